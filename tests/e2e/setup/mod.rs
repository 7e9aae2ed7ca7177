//! 测试环境设置模块
//!
//! 提供 Redis 连接、锁客户端构造以及测试 key 的清理。

mod environment;

pub use environment::TestEnvironment;
