//! 重试策略
//!
//! 给定已失败的次数，决定下一次等待多久，或者放弃。
//! 所有策略都是无状态的（`&self`），同一个实例可以通过 `Arc` 在多个任务间共享。
//!
//! 锁被占用与单次调用超时共用同一份重试预算。

use std::fmt::Debug;
use std::time::Duration;

use lock_shared::config::LockConfig;
use rand::Rng;

/// 重试策略
pub trait RetryStrategy: Send + Sync + Debug {
    /// 第 `attempt` 次失败后的等待时间（从 0 开始）
    ///
    /// 返回 `None` 表示重试次数已用尽。
    fn next(&self, attempt: u32) -> Option<Duration>;
}

// ---------------------------------------------------------------------------
// FixedIntervalRetry: 固定间隔
// ---------------------------------------------------------------------------

/// 固定间隔重试，最多重试 `max_retries` 次
#[derive(Debug, Clone)]
pub struct FixedIntervalRetry {
    pub interval: Duration,
    pub max_retries: u32,
}

impl FixedIntervalRetry {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }
}

impl From<&LockConfig> for FixedIntervalRetry {
    /// 配置中的 retry_count / retry_delay
    fn from(config: &LockConfig) -> Self {
        Self::new(config.retry_delay(), config.retry_count)
    }
}

impl RetryStrategy for FixedIntervalRetry {
    fn next(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then_some(self.interval)
    }
}

// ---------------------------------------------------------------------------
// LinearBackoffRetry: 线性退避
// ---------------------------------------------------------------------------

/// 线性退避：initial + step * attempt，不超过 max_delay
#[derive(Debug, Clone)]
pub struct LinearBackoffRetry {
    pub initial: Duration,
    pub step: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl RetryStrategy for LinearBackoffRetry {
    fn next(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay = self.initial.saturating_add(self.step.saturating_mul(attempt));
        Some(delay.min(self.max_delay))
    }
}

// ---------------------------------------------------------------------------
// ExponentialBackoffRetry: 指数退避
// ---------------------------------------------------------------------------

/// 指数退避重试
///
/// 首次失败等 `initial_delay`，之后每次乘以 `multiplier`，直到达到 `max_delay`。
/// 开启 `jitter` 后在 `[0, delay]` 内随机取值，避免大量客户端同时醒来争抢同一把锁。
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetry {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
    /// 是否启用随机抖动
    pub jitter: bool,
}

impl Default for ExponentialBackoffRetry {
    /// 默认策略：最多重试 5 次，初始等待 50 毫秒，最大等待 2 秒，倍数 2.0
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl ExponentialBackoffRetry {
    /// 计算第 N 次重试的等待时间（不含抖动）
    ///
    /// 公式: initial_delay * multiplier^attempt，结果不超过 max_delay。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

impl RetryStrategy for ExponentialBackoffRetry {
    fn next(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return Some(delay);
        }
        let jittered_ms = rand::rng().random_range(0..=delay.as_millis() as u64);
        Some(Duration::from_millis(jittered_ms))
    }
}

// ---------------------------------------------------------------------------
// UnlimitedRetry / NoRetry
// ---------------------------------------------------------------------------

/// 无限次固定间隔重试
///
/// 自身永不放弃，由调用方的取消令牌充当截止时间。
#[derive(Debug, Clone)]
pub struct UnlimitedRetry {
    pub interval: Duration,
}

impl RetryStrategy for UnlimitedRetry {
    fn next(&self, _attempt: u32) -> Option<Duration> {
        Some(self.interval)
    }
}

/// 不重试
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}
