//! CLI 模块
//!
//! 提供策略规则的命令行管理接口，支持以下功能：
//!
//! - `list` - 列出规则
//! - `add` - 从策略文档导入规则
//! - `remove` - 删除规则
//! - `test` - 用测试上下文执行规则
//! - `validate` - 校验策略文档
//! - `export` - 导出规则目录
//!
//! # 使用示例
//!
//! ```bash
//! # 列出 agent 范围内的全部规则（含禁用）
//! policy-engine list --scope agent --all
//!
//! # 导入规则
//! policy-engine --rules config/policies.yaml add new_rules.yaml
//!
//! # 用自定义上下文测试单条规则
//! policy-engine test --context ctx.json --rule memory_cleanup -o result.json
//!
//! # 导出为 JSON
//! policy-engine export --format json
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::CommandRunner;
