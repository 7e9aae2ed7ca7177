//! 测试工具模块
//!
//! 提供集成测试所需的配置和唯一 key 生成，保证并行测试互不干扰。

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::config::{LockConfig, RedisConfig};

/// 创建测试用 Redis 配置
///
/// 优先使用环境变量，否则使用本地 1 号库
pub fn test_redis_config() -> RedisConfig {
    RedisConfig {
        url: std::env::var("TEST_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .unwrap_or_else(|_| "redis://localhost:6379/1".to_string()),
        ..RedisConfig::default()
    }
}

/// 创建测试用锁配置
///
/// 租约和重试都比默认值短得多，测试可以在秒级内观察到过期。
pub fn test_lock_config() -> LockConfig {
    LockConfig {
        default_lease_ms: 2_000,
        retry_count: 5,
        retry_delay_ms: 50,
        attempt_timeout_ms: 500,
        refresh_interval_ms: 500,
        refresh_timeout_ms: 200,
        key_prefix: "test:lock:".to_string(),
    }
}

/// 生成唯一的测试锁 key
///
/// 使用 UUID 加原子计数器确保并行测试时的唯一性
pub fn test_lock_key(name: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}:{}:{}",
        name,
        Uuid::new_v4().simple(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}
