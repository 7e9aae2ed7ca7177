//! 测试环境管理

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lock_shared::config::{LockConfig, RedisConfig};
use lock_shared::test_utils::{test_lock_config, test_lock_key, test_redis_config};
use redis::aio::MultiplexedConnection;
use redis_lock::{LockClient, RedisLockStore};

/// 测试环境
///
/// 每个环境拥有独立的 key 列表，`cleanup` 只删除自己创建的 key。
pub struct TestEnvironment {
    pub redis_config: RedisConfig,
    pub lock_config: LockConfig,
    pub store: Arc<RedisLockStore>,
    conn: MultiplexedConnection,
    keys: Vec<String>,
}

impl TestEnvironment {
    /// 连接 Redis 并准备环境
    pub async fn setup() -> Result<Self> {
        let redis_config = test_redis_config();
        let lock_config = test_lock_config();

        let store = RedisLockStore::connect(&redis_config).await?;
        store.health_check().await?;

        let conn = redis::Client::open(redis_config.url.as_str())?
            .get_multiplexed_async_connection()
            .await?;

        Ok(Self {
            redis_config,
            lock_config,
            store: Arc::new(store),
            conn,
            keys: Vec::new(),
        })
    }

    /// 新建一个共享同一连接的锁客户端，模拟独立的进程实例
    pub fn client(&self) -> LockClient {
        LockClient::with_config(self.store.clone(), self.lock_config.clone())
    }

    /// 生成本测试专用的锁名（不含前缀）
    pub fn key(&mut self, name: &str) -> String {
        let key = test_lock_key(name);
        self.keys.push(self.stored_key(&key));
        key
    }

    /// 锁名在 Redis 中的实际 key
    pub fn stored_key(&self, key: &str) -> String {
        format!("{}{}", self.lock_config.key_prefix, key)
    }

    /// 直接读取存储中的令牌
    pub async fn stored_token(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.stored_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    /// 剩余租约，key 不存在时返回 None
    pub async fn remaining_lease(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.stored_key(key))
            .query_async(&mut conn)
            .await?;
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    /// 以其他持有者的身份直接写入锁
    pub async fn occupy(&self, key: &str, token: &str, lease: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.stored_key(key))
            .arg(token)
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// 删除本环境创建的所有 key
    pub async fn cleanup(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(&self.keys)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
