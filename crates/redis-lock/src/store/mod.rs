//! 原子存储操作
//!
//! 锁协议只依赖三个原子操作，每个都必须在存储端一步完成，
//! 不允许客户端先读后写（读写之间可能发生过期或他人的合法释放）。
//!
//! - `RedisLockStore`: 基于 `SET NX PX` 和 Lua 脚本的 Redis 实现
//! - `MemoryLockStore`: 进程内实现，用于测试和单进程场景

mod memory;
mod redis_store;

pub use self::memory::MemoryLockStore;
pub use self::redis_store::RedisLockStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// 锁存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockStore: Send + Sync {
    /// 仅当 key 不存在时写入 token，并设置过期时间
    ///
    /// 返回 true 表示本次调用创建了该条目。
    async fn acquire_if_absent(
        &self,
        key: &str,
        token: &str,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    /// 当 key 当前的值等于 token 时，把过期时间重置为 `lease_millis`
    ///
    /// 成功返回 1；值不匹配或 key 不存在返回 0。
    async fn extend_if_owned(
        &self,
        key: &str,
        token: &str,
        lease_millis: u64,
    ) -> Result<i64, StoreError>;

    /// 当 key 当前的值等于 token 时删除它
    ///
    /// 成功返回 1；值不匹配或 key 不存在返回 0。
    async fn delete_if_owned(&self, key: &str, token: &str) -> Result<i64, StoreError>;
}
