//! 分布式锁端到端测试
//!
//! 针对真实 Redis 运行，覆盖：
//! - 单次加锁与竞争
//! - 重试加锁与取消
//! - 续约、自动续约与释放
//! - 合并加锁
//!
//! 运行方式: `REDIS_URL=redis://localhost:6379/1 cargo test --test e2e -- --ignored`

pub mod setup;
pub mod suites;

pub use setup::TestEnvironment;
