//! Redis 锁存储
//!
//! 加锁使用 `SET key token NX PX ms` 单条命令；续约和释放使用 Lua 脚本，
//! 在 Redis 端原子地完成"比较 token + 执行动作"。

use std::time::Duration;

use async_trait::async_trait;
use lock_shared::config::RedisConfig;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Script};
use tracing::{info, instrument};

use super::LockStore;
use crate::error::StoreError;

/// 续约脚本：只有 token 匹配时才重置过期时间
const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// 释放脚本：只有 token 匹配时才删除，避免误删其他客户端的锁
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_timeout() {
            StoreError::DeadlineExceeded
        } else {
            StoreError::other(err)
        }
    }
}

/// 基于 Redis 的锁存储
///
/// 持有一个多路复用连接，每次操作克隆使用，克隆本身很廉价。
#[derive(Clone)]
pub struct RedisLockStore {
    conn: MultiplexedConnection,
    extend_script: Script,
    release_script: Script,
}

impl RedisLockStore {
    /// 连接 Redis 并创建锁存储
    #[instrument(skip(config))]
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())?;
        let conn = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::DeadlineExceeded)??;

        info!("Redis lock store connected");
        Ok(Self::new(conn))
    }

    /// 使用已有连接创建锁存储
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            extend_script: Script::new(EXTEND_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn acquire_if_absent(
        &self,
        key: &str,
        token: &str,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let lease_ms = lease.as_millis() as u64;

        // SET NX 成功时返回 "OK"，key 已存在时返回 nil
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn extend_if_owned(
        &self,
        key: &str,
        token: &str,
        lease_millis: u64,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend_script
            .key(key)
            .arg(token)
            .arg(lease_millis)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended)
    }

    async fn delete_if_owned(&self, key: &str, token: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted)
    }
}
