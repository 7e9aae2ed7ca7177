//! 已持有的锁
//!
//! 一次成功加锁得到一个 `Lock`，提供续约、自动续约和释放。
//! 释放信号是一次性的：`unlock` 第一次调用时触发，之后再调用不会重复触发，
//! 自动续约循环和任意其他观察者都可以等待它。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lock_shared::config::LockConfig;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{LockError, Result, StoreError};
use crate::store::LockStore;

/// 已持有的分布式锁
///
/// ## 注意事项
///
/// 应显式调用 `unlock()` 释放。Drop 无法执行异步操作，
/// 未释放的锁只能等待租约到期后由存储端自动删除。
pub struct Lock {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    lease: Duration,
    /// 标记释放信号是否已触发，保证只触发一次
    released: AtomicBool,
    release_signal: CancellationToken,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("lease", &self.lease)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Lock {
    pub(crate) fn new(store: Arc<dyn LockStore>, key: String, token: String, lease: Duration) -> Self {
        Self {
            store,
            key,
            token,
            lease,
            released: AtomicBool::new(false),
            release_signal: CancellationToken::new(),
        }
    }

    /// 锁在存储中的 key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 本次加锁的所有权令牌
    pub fn token(&self) -> &str {
        &self.token
    }

    /// 租约时长
    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// 是否已调用过 `unlock`
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// 等待释放信号
    pub async fn released(&self) {
        self.release_signal.cancelled().await;
    }

    /// 续约：把存储端的过期时间重置为完整租约
    ///
    /// token 不匹配或 key 已不存在时返回 `NotHeld`。
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn refresh(&self) -> Result<()> {
        let lease_ms = self.lease.as_millis() as u64;
        let result = match self
            .store
            .extend_if_owned(&self.key, &self.token, lease_ms)
            .await
        {
            Ok(1) => Ok(()),
            Ok(_) | Err(StoreError::NotFound) => Err(LockError::NotHeld {
                key: self.key.clone(),
            }),
            Err(e) => Err(LockError::from(e)),
        };

        let outcome = match &result {
            Ok(()) => "extended",
            Err(LockError::NotHeld { .. }) => "not_held",
            Err(LockError::DeadlineExceeded) => "timeout",
            Err(_) => "error",
        };
        metrics::counter!("lock_refresh_total", "outcome" => outcome).increment(1);

        result
    }

    /// 带超时的续约，超时返回 `DeadlineExceeded`
    pub async fn refresh_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.refresh())
            .await
            .map_err(|_| LockError::DeadlineExceeded)?
    }

    /// 自动续约循环
    ///
    /// 应在调用方自己的任务中运行，每隔 `interval` 续约一次，
    /// 单次续约最多等待 `timeout`：
    ///
    /// - 续约超时：租约可能即将到期，立即再续一次，不等下一个 tick
    /// - 其他错误（包括 `NotHeld`）：返回该错误，调用方应认为资源已不受保护
    /// - `unlock` 被调用：返回 `Ok(())`
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn auto_refresh(&self, interval: Duration, timeout: Duration) -> Result<()> {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut urgent = false;

        loop {
            if urgent {
                if self.release_signal.is_cancelled() {
                    info!("Lock released, auto refresh stopped");
                    return Ok(());
                }
            } else {
                tokio::select! {
                    biased;
                    _ = self.release_signal.cancelled() => {
                        info!("Lock released, auto refresh stopped");
                        return Ok(());
                    }
                    _ = ticker.tick() => {}
                }
            }

            match self.refresh_timeout(timeout).await {
                Ok(()) => {
                    debug!("Lock lease extended");
                    urgent = false;
                }
                Err(LockError::DeadlineExceeded) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Lock refresh timed out, retrying immediately");
                    urgent = true;
                }
                Err(e) => {
                    warn!(error = %e, "Lock refresh failed, auto refresh stopped");
                    return Err(e);
                }
            }
        }
    }

    /// 使用配置中的续约间隔和超时运行自动续约
    pub async fn auto_refresh_with(&self, config: &LockConfig) -> Result<()> {
        self.auto_refresh(config.refresh_interval(), config.refresh_timeout())
            .await
    }

    /// 释放锁
    ///
    /// 只删除仍然属于自己的 key。锁已过期、已被他人持有或已释放时返回 `NotHeld`。
    /// 无论存储端结果如何，释放信号都会触发（且只触发一次），自动续约循环随之退出。
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn unlock(&self) -> Result<()> {
        if !self.fire_release_signal() {
            debug!("Release signal already fired");
        }

        let result = match self.store.delete_if_owned(&self.key, &self.token).await {
            Ok(0) | Err(StoreError::NotFound) => {
                // 锁已经不存在或被其他客户端持有，通常表示租约已过期
                warn!(token = %self.token, "Lock was already released or owned by another client");
                Err(LockError::NotHeld {
                    key: self.key.clone(),
                })
            }
            Ok(_) => {
                debug!("Lock released");
                Ok(())
            }
            Err(e) => Err(LockError::from(e)),
        };

        let outcome = match &result {
            Ok(()) => "released",
            Err(LockError::NotHeld { .. }) => "not_held",
            Err(_) => "error",
        };
        metrics::counter!("lock_release_total", "outcome" => outcome).increment(1);

        result
    }

    /// 触发释放信号，返回本次调用是否真正触发
    fn fire_release_signal(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.release_signal.cancel();
        true
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!(
                key = %self.key,
                token = %self.token,
                "Lock dropped without explicit unlock - lock will expire via lease"
            );
        }
    }
}
