//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构。

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::document::DocumentFormat;
use crate::rule::Scope;

/// 策略规则命令行工具
///
/// 规则文件默认取配置 `engine.rules_file`，可用 `--rules` 覆盖。
#[derive(Parser, Debug)]
#[command(name = "policy-engine")]
#[command(version, about = "策略规则引擎管理工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 规则文件路径（.yaml / .yml / .json）
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// 日志级别 (trace, debug, info, warn, error)，默认取配置
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// 输出格式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    /// 对应的文档格式，文本输出没有对应格式
    pub fn document_format(self) -> Option<DocumentFormat> {
        match self {
            Self::Text => None,
            Self::Json => Some(DocumentFormat::Json),
            Self::Yaml => Some(DocumentFormat::Yaml),
        }
    }
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 列出规则
    ///
    /// 默认只显示启用的规则，按优先级降序排列。
    List {
        /// 只显示指定范围（global, agent, workflow, task, user, session）
        #[arg(short, long)]
        scope: Option<Scope>,

        /// 同时显示禁用的规则
        #[arg(short, long)]
        all: bool,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// 从策略文档导入规则并写回规则文件
    ///
    /// 任意一条规则导入失败时不写回，退出码为 1。
    Add {
        /// 策略文档路径（JSON/YAML，顶层为 rules）
        file: PathBuf,
    },

    /// 删除规则
    Remove {
        /// 规则名称
        name: String,
    },

    /// 用测试上下文执行规则
    ///
    /// 未指定上下文文件时使用内置的测试上下文。
    Test {
        /// 上下文文件路径（JSON）
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// 只执行指定规则的动作（不做条件与门控判断）
        #[arg(short, long)]
        rule: Option<String>,

        /// 结果输出文件（JSON）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 校验策略文档中的每条规则
    Validate {
        /// 策略文档路径
        file: PathBuf,
    },

    /// 导出规则目录
    Export {
        /// 导出格式
        #[arg(short, long, value_enum, default_value = "yaml")]
        format: ExportFormat,
    },
}

/// 导出格式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
}

impl From<ExportFormat> for DocumentFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => DocumentFormat::Json,
            ExportFormat::Yaml => DocumentFormat::Yaml,
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================
