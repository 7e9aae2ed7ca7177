//! 所有权令牌
//!
//! 令牌是证明"谁持有这把锁"的唯一凭据，而不是调用方身份。
//! 格式: `{instance_id}:{uuid}`，instance_id 区分不同的客户端实例，
//! uuid 保证同一实例内每次加锁调用的令牌互不相同。

use uuid::Uuid;

/// 令牌生成器，每个 `LockClient` 持有一个
#[derive(Debug, Clone)]
pub struct TokenGenerator {
    instance_id: String,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// 实例唯一标识
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 生成一个新令牌
    ///
    /// 每次逻辑上的加锁调用生成一次，同一调用的多次重试共用。
    pub fn mint(&self) -> String {
        format!("{}:{}", self.instance_id, Uuid::new_v4())
    }
}
