//! 游戏币账本
//! 每个地址一个余额，纯十进制文本，每次变更后整体原子覆盖

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::{domain::AccountAddress, infrastructure::atomic_file};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient coin balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },
    #[error("ledger storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("invalid coin amount: {0}")]
    InvalidAmount(String),
}

#[async_trait]
pub trait CoinLedger: Send + Sync {
    /// 当前余额；无记录时返回默认值
    async fn read(&self, owner: &AccountAddress) -> Result<u64, LedgerError>;

    /// 增加余额并持久化，返回新余额
    async fn credit(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError>;

    /// 扣减余额并持久化，余额不足时失败，返回新余额
    async fn debit(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError>;
}

/// 基于文件的账本：`<data_dir>/ledger/<address>.coins`
pub struct FileCoinLedger {
    dir: PathBuf,
    default_balance: u64,
    /// 每个地址一把锁，串行化读-改-写；空闲即回收
    locks: Mutex<HashMap<AccountAddress, Arc<AsyncMutex<()>>>>,
    /// 已持久化的值；只在写盘成功后更新，随锁一起回收
    cache: Mutex<HashMap<AccountAddress, u64>>,
}

impl FileCoinLedger {
    pub fn new(data_dir: impl AsRef<Path>, default_balance: u64) -> Self {
        Self {
            dir: data_dir.as_ref().join("ledger"),
            default_balance,
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, owner: &AccountAddress) -> PathBuf {
        self.dir.join(format!("{}.coins", owner))
    }

    fn owner_lock(&self, owner: &AccountAddress) -> Arc<AsyncMutex<()>> {
        lock_map(&self.locks)
            .entry(*owner)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 操作结束后若无其它等待者，回收该地址的锁与缓存
    fn release_idle(&self, owner: &AccountAddress, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = lock_map(&self.locks);
        // 表中一份 + 当前调用一份
        if Arc::strong_count(lock) == 2 {
            locks.remove(owner);
            lock_map(&self.cache).remove(owner);
        }
    }

    fn cached(&self, owner: &AccountAddress) -> Option<u64> {
        lock_map(&self.cache).get(owner).copied()
    }

    fn remember(&self, owner: &AccountAddress, value: u64) {
        lock_map(&self.cache).insert(*owner, value);
    }

    /// 从磁盘读取（调用方需持有地址锁或接受读到旧值）
    async fn load(&self, owner: &AccountAddress) -> Result<u64, LedgerError> {
        if let Some(value) = self.cached(owner) {
            return Ok(value);
        }

        let path = self.path_for(owner);
        let value = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content.trim().parse::<u64>().map_err(|e| {
                LedgerError::StorageUnavailable(format!(
                    "corrupt balance record {:?}: {}",
                    path, e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(owner = %owner, default = self.default_balance, "No ledger record, using default balance");
                self.default_balance
            }
            Err(e) => {
                return Err(LedgerError::StorageUnavailable(format!(
                    "failed to read {:?}: {}",
                    path, e
                )))
            }
        };

        self.remember(owner, value);
        Ok(value)
    }

    async fn persist(&self, owner: &AccountAddress, value: u64) -> Result<(), LedgerError> {
        let path = self.path_for(owner);
        atomic_file::write_atomic(&path, value.to_string().as_bytes())
            .await
            .map_err(|e| {
                LedgerError::StorageUnavailable(format!("failed to write {:?}: {}", path, e))
            })?;
        self.remember(owner, value);
        Ok(())
    }
}

fn lock_map<K, V>(map: &Mutex<HashMap<K, V>>) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn require_positive(amount: u64) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount("amount must be positive".into()));
    }
    Ok(())
}

impl FileCoinLedger {
    async fn credit_locked(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError> {
        let current = self.load(owner).await?;
        let next = current.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidAmount(format!("credit of {} overflows balance {}", amount, current))
        })?;
        // 写盘失败时缓存保持旧值
        self.persist(owner, next).await?;

        tracing::info!(owner = %owner, amount, balance = next, "Coins credited");
        Ok(next)
    }

    async fn debit_locked(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError> {
        let current = self.load(owner).await?;
        if amount > current {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: current,
            });
        }
        let next = current - amount;
        self.persist(owner, next).await?;

        tracing::info!(owner = %owner, amount, balance = next, "Coins debited");
        Ok(next)
    }
}

#[async_trait]
impl CoinLedger for FileCoinLedger {
    async fn read(&self, owner: &AccountAddress) -> Result<u64, LedgerError> {
        let lock = self.owner_lock(owner);
        let result = {
            let _guard = lock.lock().await;
            self.load(owner).await
        };
        self.release_idle(owner, &lock);
        result
    }

    async fn credit(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError> {
        require_positive(amount)?;
        let lock = self.owner_lock(owner);
        let result = {
            let _guard = lock.lock().await;
            self.credit_locked(owner, amount).await
        };
        self.release_idle(owner, &lock);
        result
    }

    async fn debit(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError> {
        require_positive(amount)?;
        let lock = self.owner_lock(owner);
        let result = {
            let _guard = lock.lock().await;
            self.debit_locked(owner, amount).await
        };
        self.release_idle(owner, &lock);
        result
    }
}
