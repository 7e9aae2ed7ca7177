//! 锁客户端
//!
//! 编排单次加锁、带重试的加锁和合并加锁。
//!
//! 重试加锁时区分两类失败：
//! - 单次调用超时、锁被他人持有：属于竞争，按重试策略等待后再试
//! - 其他存储错误（连接断开、协议错误等）：重试无意义，立即返回
//!
//! 这样基础设施故障不会被伪装成锁竞争。

use std::sync::Arc;
use std::time::Duration;

use lock_shared::config::{AppConfig, LockConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{LockError, Result, StoreError};
use crate::lock::Lock;
use crate::retry::{FixedIntervalRetry, RetryStrategy};
use crate::single_flight::{FlightError, SingleFlight};
use crate::store::{LockStore, RedisLockStore};
use crate::token::TokenGenerator;

/// 分布式锁客户端
///
/// 每个客户端持有自己的合并调用表，同一进程内的多个客户端互不干扰。
pub struct LockClient {
    store: Arc<dyn LockStore>,
    tokens: TokenGenerator,
    config: LockConfig,
    flights: SingleFlight<Result<Arc<Lock>>>,
}

impl LockClient {
    /// 使用默认配置创建客户端
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_config(store, LockConfig::default())
    }

    /// 创建客户端
    pub fn with_config(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self {
            store,
            tokens: TokenGenerator::new(),
            config,
            flights: SingleFlight::with_orphan_handler(release_orphaned),
        }
    }

    /// 按应用配置连接 Redis 并创建客户端
    #[instrument(skip(config), fields(service = %config.service_name))]
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store = RedisLockStore::connect(&config.redis).await?;
        store.health_check().await?;
        info!("Lock client ready");
        Ok(Self::with_config(Arc::new(store), config.lock.clone()))
    }

    /// 客户端实例标识，也是所有令牌的前缀
    pub fn instance_id(&self) -> &str {
        self.tokens.instance_id()
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// 带前缀的存储 key
    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// 尝试加锁，不重试
    ///
    /// 锁已被持有时返回 `AcquisitionFailed`，存储错误原样返回。
    #[instrument(skip(self), fields(instance_id = %self.tokens.instance_id()))]
    pub async fn try_lock(&self, key: &str, lease: Duration) -> Result<Lock> {
        validate_lease(lease)?;
        let key = self.store_key(key);
        let token = self.tokens.mint();

        match self.store.acquire_if_absent(&key, &token, lease).await {
            Ok(true) => {
                debug!(key = %key, "Lock acquired");
                record_acquire("acquired");
                Ok(Lock::new(self.store.clone(), key, token, lease))
            }
            Ok(false) => {
                debug!(key = %key, "Lock not acquired, resource is locked");
                record_acquire("contended");
                Err(LockError::AcquisitionFailed { key })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Lock acquisition failed");
                record_acquire("error");
                Err(e.into())
            }
        }
    }

    /// 使用配置中的默认租约尝试加锁
    pub async fn try_lock_with_defaults(&self, key: &str) -> Result<Lock> {
        self.try_lock(key, self.config.default_lease()).await
    }

    /// 带重试的加锁
    ///
    /// 整个调用只生成一个令牌。每次尝试受 `attempt_timeout` 限制；
    /// `cancel` 触发时立即返回 `Cancelled`，不论正在尝试还是在退避等待。
    #[instrument(skip(self, retry, cancel), fields(instance_id = %self.tokens.instance_id()))]
    pub async fn lock(
        &self,
        key: &str,
        lease: Duration,
        retry: Arc<dyn RetryStrategy>,
        attempt_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Lock> {
        validate_lease(lease)?;
        validate_attempt_timeout(attempt_timeout)?;
        let key = self.store_key(key);
        let token = self.tokens.mint();

        acquire_with_retry(
            self.store.clone(),
            key,
            token,
            lease,
            retry,
            attempt_timeout,
            cancel.clone(),
        )
        .await
    }

    /// 使用配置中的租约、重试策略和单次超时加锁
    pub async fn lock_with_defaults(&self, key: &str, cancel: &CancellationToken) -> Result<Lock> {
        self.lock(
            key,
            self.config.default_lease(),
            Arc::new(FixedIntervalRetry::from(&self.config)),
            self.config.attempt_timeout(),
            cancel,
        )
        .await
    }

    /// 合并加锁
    ///
    /// 同一 key 上并发的调用只执行一次底层 `lock`，所有调用方拿到同一个
    /// `Arc<Lock>` 或同一个错误。每个调用方的 `cancel` 触发时只是自己离开；
    /// 底层调用只在所有调用方都离开后才被取消。调用完成时已无人接收的锁会被立即释放。
    #[instrument(skip(self, retry, cancel), fields(instance_id = %self.tokens.instance_id()))]
    pub async fn single_flight_lock(
        &self,
        key: &str,
        lease: Duration,
        retry: Arc<dyn RetryStrategy>,
        attempt_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<Lock>> {
        validate_lease(lease)?;
        validate_attempt_timeout(attempt_timeout)?;
        let key = self.store_key(key);

        let flight = self.flights.call(&key, cancel, |abandoned| {
            let store = self.store.clone();
            let token = self.tokens.mint();
            let key = key.clone();
            async move {
                acquire_with_retry(store, key, token, lease, retry, attempt_timeout, abandoned)
                    .await
                    .map(Arc::new)
            }
        });

        match flight.await {
            Ok(result) => result,
            Err(FlightError::Cancelled) => Err(LockError::Cancelled),
            Err(FlightError::Aborted) => Err(LockError::Internal(format!(
                "single flight lock aborted: key={key}"
            ))),
        }
    }
}

/// 合并加锁成功但没有调用方接收时，在后台释放这把锁
fn release_orphaned(result: Result<Arc<Lock>>) {
    let Ok(lock) = result else {
        return;
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            info!(key = %lock.key(), "Releasing lock acquired for departed callers");
            handle.spawn(async move {
                if let Err(e) = lock.unlock().await {
                    warn!(key = %lock.key(), error = %e, "Failed to release orphaned lock");
                }
            });
        }
        Err(_) => {
            warn!(key = %lock.key(), "No runtime to release orphaned lock, it will expire via lease");
        }
    }
}

/// 重试加锁的主循环
///
/// 不借用客户端，合并加锁可以把它放到独立任务中执行。
async fn acquire_with_retry(
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    lease: Duration,
    retry: Arc<dyn RetryStrategy>,
    attempt_timeout: Duration,
    cancel: CancellationToken,
) -> Result<Lock> {
    let mut attempt: u32 = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                record_acquire("cancelled");
                return Err(LockError::Cancelled);
            }
            outcome = tokio::time::timeout(
                attempt_timeout,
                store.acquire_if_absent(&key, &token, lease),
            ) => outcome,
        };

        match outcome {
            Ok(Ok(true)) => {
                debug!(key = %key, attempt, "Lock acquired");
                record_acquire("acquired");
                return Ok(Lock::new(store, key, token, lease));
            }
            Ok(Ok(false)) => {
                debug!(key = %key, attempt, "Lock held by another owner");
            }
            Ok(Err(StoreError::DeadlineExceeded)) | Err(_) => {
                debug!(
                    key = %key,
                    attempt,
                    timeout_ms = attempt_timeout.as_millis() as u64,
                    "Lock attempt timed out"
                );
            }
            Ok(Err(e)) => {
                // 非超时错误，基本代表存储不可用，重试没有意义
                warn!(key = %key, attempt, error = %e, "Lock acquisition aborted by store error");
                record_acquire("error");
                return Err(LockError::Store(e));
            }
        }

        let Some(interval) = retry.next(attempt) else {
            debug!(key = %key, attempts = attempt + 1, "Lock retries exhausted");
            record_acquire("exhausted");
            return Err(LockError::AcquisitionFailed { key });
        };
        attempt += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                record_acquire("cancelled");
                return Err(LockError::Cancelled);
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// 存储端以毫秒计时，不足 1 毫秒的租约会被截断为 0
const MIN_DURATION: Duration = Duration::from_millis(1);

fn validate_lease(lease: Duration) -> Result<()> {
    if lease < MIN_DURATION {
        return Err(LockError::InvalidArgument(format!(
            "lease must be at least 1ms, got {lease:?}"
        )));
    }
    Ok(())
}

fn validate_attempt_timeout(timeout: Duration) -> Result<()> {
    if timeout < MIN_DURATION {
        return Err(LockError::InvalidArgument(format!(
            "attempt timeout must be at least 1ms, got {timeout:?}"
        )));
    }
    Ok(())
}

fn record_acquire(outcome: &'static str) {
    metrics::counter!("lock_acquire_total", "outcome" => outcome).increment(1);
}
