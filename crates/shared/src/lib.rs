//! 共享库
//!
//! 策略引擎各组件共用的配置加载与可观测性初始化。

pub mod config;
pub mod observability;
