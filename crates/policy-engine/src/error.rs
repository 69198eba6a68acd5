//! 策略引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("条件定义无效 ({kind}): {message}")]
    InvalidCondition { kind: String, message: String },

    #[error("策略规则 '{name}' 无效: {}", .errors.join(", "))]
    InvalidRule { name: String, errors: Vec<String> },

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("条件评估失败: {0}")]
    EvaluationError(String),

    #[error("策略文档格式不支持: {0}")]
    UnsupportedFormat(String),

    #[error("策略文档读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML 序列化错误: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
