// 带指数退避的重试
// 用于补偿性入账：提现失败后退回游戏币必须尽最大努力完成

use std::{future::Future, time::Duration};

use tokio::time::sleep;

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重试次数（不含首次）
    pub max_retries: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// 单次退避上限
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 执行 `op` 直到成功或用尽重试次数，返回最后一次错误
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation = %operation, attempts = attempt + 1, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.config.max_retries => {
                    tracing::warn!(
                        operation = %operation,
                        attempt = attempt + 1,
                        error = %e,
                        next_retry_in_ms = backoff.as_millis() as u64,
                        "Operation failed, will retry"
                    );
                    sleep(backoff).await;
                    backoff = backoff
                        .mul_f64(self.config.backoff_multiplier)
                        .min(self.config.max_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        operation = %operation,
                        attempts = attempt + 1,
                        error = %e,
                        "Operation failed after all retries"
                    );
                    return Err(e);
                }
            }
        }
    }
}
