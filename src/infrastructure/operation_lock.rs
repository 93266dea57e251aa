//! 按用户串行化的操作锁
//! 同一地址的充值/提现排队执行，超过等待时间则拒绝
//! 锁守卫离开作用域自动释放

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 等待锁超时
#[derive(Debug, Clone, thiserror::Error)]
#[error("operation for '{key}' still in progress after {waited:?}")]
pub struct LockTimeout {
    pub key: String,
    pub waited: Duration,
}

type SlotMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// 进程内操作锁
#[derive(Clone, Default)]
pub struct OperationLock {
    slots: Arc<Mutex<SlotMap>>,
}

/// 锁守卫（自动释放）
pub struct OperationGuard {
    slots: Arc<Mutex<SlotMap>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = lock_slots(&self.slots);
        // 没有其它持有者/等待者时回收槽位
        if let Some(slot) = slots.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}

fn lock_slots(slots: &Mutex<SlotMap>) -> std::sync::MutexGuard<'_, SlotMap> {
    match slots.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        lock_slots(&self.slots)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 获取锁，最多等待 `timeout`
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<OperationGuard, LockTimeout> {
        let slot = self.slot(key);
        let start = std::time::Instant::now();

        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => {
                tracing::debug!(
                    lock_key = %key,
                    waited_ms = start.elapsed().as_millis(),
                    "Acquired operation lock"
                );
                Ok(OperationGuard {
                    slots: self.slots.clone(),
                    key: key.to_string(),
                    guard: Some(guard),
                })
            }
            Err(_) => {
                // 超时放弃时也要回收空槽位
                self.release_if_idle(key);
                Err(LockTimeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    fn release_if_idle(&self, key: &str) {
        let mut slots = lock_slots(&self.slots);
        if let Some(slot) = slots.get(key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(key);
            }
        }
    }
}
