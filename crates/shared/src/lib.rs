//! 共享库
//!
//! 包含锁客户端和使用它的服务共用的配置加载、日志与指标初始化以及测试辅助代码。

pub mod config;
pub mod observability;
pub mod test_utils;
