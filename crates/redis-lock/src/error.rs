//! 分布式锁错误类型
//!
//! 存储层错误只区分三类：键不存在、调用超时、其他。
//! 其余细节（连接断开、协议错误等）原样透传，不做二次解释。

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// 存储层错误分类
///
/// 由 `LockStore` 实现负责把底层客户端的错误归入这三类，
/// 锁客户端只根据分类决定重试还是中止。
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("键不存在")]
    NotFound,

    #[error("存储调用超时")]
    DeadlineExceeded,

    #[error(transparent)]
    Other(Arc<dyn StdError + Send + Sync>),
}

impl StoreError {
    /// 包装任意底层错误为 `Other`
    pub fn other<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Other(Arc::new(err))
    }
}

/// 锁操作错误类型
///
/// 实现 `Clone`，以便合并调用（single flight）时把同一个错误分发给所有等待者。
#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("加锁失败: key={key}")]
    AcquisitionFailed { key: String },

    #[error("未持有锁: key={key}")]
    NotHeld { key: String },

    #[error("操作已取消")]
    Cancelled,

    #[error("存储调用超时")]
    DeadlineExceeded,

    #[error("无效的参数: {0}")]
    InvalidArgument(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(StoreError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, LockError>;

impl From<StoreError> for LockError {
    /// 超时单独成类，其余存储错误原样保留
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DeadlineExceeded => Self::DeadlineExceeded,
            other => Self::Store(other),
        }
    }
}

impl LockError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::AcquisitionFailed { .. } => "LOCK_ACQUISITION_FAILED",
            Self::NotHeld { .. } => "LOCK_NOT_HELD",
            Self::Cancelled => "CANCELLED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// 调用方稍后重试是否可能成功
    ///
    /// 锁被占用、单次调用超时属于竞争，可以重试；
    /// 丢失所有权、取消、存储故障都需要调用方自行处理。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquisitionFailed { .. } | Self::DeadlineExceeded)
    }
}
