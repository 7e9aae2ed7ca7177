//! 测试套件模块
//!
//! 按锁的生命周期阶段组织的测试用例集合。

pub mod acquire;
pub mod single_flight;
