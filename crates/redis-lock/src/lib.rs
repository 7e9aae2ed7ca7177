//! 基于 Redis 的分布式锁
//!
//! 多个独立进程通过同一个 Redis 协调对命名资源的互斥访问，
//! 存储端的原子操作是唯一的一致性来源。
//!
//! ## 模块结构
//!
//! - `client`: 锁客户端（单次加锁、重试加锁、合并加锁）
//! - `lock`: 已持有的锁（续约、自动续约、释放）
//! - `store`: 原子存储操作（Redis 实现与内存实现）
//! - `retry`: 重试策略
//! - `token`: 所有权令牌
//! - `single_flight`: 按 key 合并并发调用
//! - `error`: 错误类型定义
//!
//! ## 使用示例
//!
//! ```ignore
//! let client = LockClient::from_config(&AppConfig::load("order-service")?).await?;
//! let cancel = CancellationToken::new();
//!
//! let lock = Arc::new(client.lock_with_defaults("job:42", &cancel).await?);
//!
//! // 在独立任务中自动续约
//! let watchdog = {
//!     let lock = lock.clone();
//!     tokio::spawn(async move { lock.auto_refresh(Duration::from_secs(10), Duration::from_secs(1)).await })
//! };
//!
//! do_critical_work().await?;
//!
//! lock.unlock().await?;
//! watchdog.await??;
//! ```

pub mod client;
pub mod error;
pub mod lock;
pub mod retry;
pub mod single_flight;
pub mod store;
pub mod token;

pub use client::LockClient;
pub use error::{LockError, Result, StoreError};
pub use lock::Lock;
pub use lock_shared::config::LockConfig;
pub use retry::{
    ExponentialBackoffRetry, FixedIntervalRetry, LinearBackoffRetry, NoRetry, RetryStrategy,
    UnlimitedRetry,
};
pub use single_flight::{FlightError, SingleFlight};
pub use store::{LockStore, MemoryLockStore, RedisLockStore};
pub use token::TokenGenerator;
pub use tokio_util::sync::CancellationToken;
