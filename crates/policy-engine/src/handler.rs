//! 动作处理器
//!
//! 引擎不直接执行副作用（记忆读写、Webhook 调用等），而是把动作转换为类型化的
//! [`ActionCommand`] 并分发给注入的 [`ActionHandler`]。

use crate::action::{Action, ActionKind};
use crate::context::EvaluationContext;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// 处理器错误
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("动作参数无效: {0}")]
    InvalidParameters(String),

    #[error("动作执行失败: {0}")]
    Failed(String),
}

/// 分发给处理器的命令
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ActionCommand {
    CreateMemory {
        content: String,
        tags: Vec<String>,
        metadata: Map<String, Value>,
    },
    RecallMemory {
        query: Option<String>,
        memory_id: Option<String>,
        limit: u64,
    },
    UpdateMemory {
        memory_id: Option<String>,
        updates: Map<String, Value>,
    },
    DeleteMemory {
        memory_id: Option<String>,
    },
    ArchiveMemory {
        memory_id: Option<String>,
        archive_location: String,
    },
    SetQualityScore {
        memory_id: Option<String>,
        score: f64,
    },
    AddTag {
        memory_id: Option<String>,
        tag: String,
    },
    RemoveTag {
        memory_id: Option<String>,
        tag: Option<String>,
    },
    TriggerAlert {
        alert_type: String,
        message: String,
    },
    LogEvent {
        level: String,
        message: String,
    },
    ExecuteWebhook {
        url: String,
        method: String,
        headers: Map<String, Value>,
        data: Value,
    },
}

impl ActionCommand {
    /// 从动作参数构造命令
    ///
    /// 控制类动作（ABORT、SKIP、CHAIN_POLICY）返回 `None`，由引擎自行处理。
    pub fn from_action(action: &Action) -> Result<Option<Self>, HandlerError> {
        let p = &action.parameters;

        let command = match action.kind {
            ActionKind::CreateMemory => Self::CreateMemory {
                content: required_text(p, "content")?,
                tags: string_list(p.get("tags")),
                metadata: object(p.get("metadata")),
            },
            ActionKind::RecallMemory => Self::RecallMemory {
                query: optional_text(p, "query"),
                memory_id: optional_text(p, "memory_id"),
                limit: p.get("limit").and_then(Value::as_u64).unwrap_or(10),
            },
            ActionKind::UpdateMemory => Self::UpdateMemory {
                memory_id: optional_text(p, "memory_id"),
                updates: object(p.get("updates")),
            },
            ActionKind::DeleteMemory => Self::DeleteMemory {
                memory_id: optional_text(p, "memory_id"),
            },
            ActionKind::ArchiveMemory => Self::ArchiveMemory {
                memory_id: optional_text(p, "memory_id"),
                archive_location: optional_text(p, "archive_location")
                    .unwrap_or_else(|| "default".to_string()),
            },
            ActionKind::SetQualityScore => Self::SetQualityScore {
                memory_id: optional_text(p, "memory_id"),
                score: p.get("score").and_then(Value::as_f64).ok_or_else(|| {
                    HandlerError::InvalidParameters("score 必须是数字".to_string())
                })?,
            },
            ActionKind::AddTag => Self::AddTag {
                memory_id: optional_text(p, "memory_id"),
                tag: required_text(p, "tag")?,
            },
            ActionKind::RemoveTag => Self::RemoveTag {
                memory_id: optional_text(p, "memory_id"),
                tag: optional_text(p, "tag"),
            },
            ActionKind::TriggerAlert => Self::TriggerAlert {
                alert_type: optional_text(p, "alert_type").unwrap_or_else(|| "info".to_string()),
                message: optional_text(p, "message")
                    .unwrap_or_else(|| "Policy alert triggered".to_string()),
            },
            ActionKind::LogEvent => Self::LogEvent {
                level: optional_text(p, "level").unwrap_or_else(|| "info".to_string()),
                message: optional_text(p, "message")
                    .unwrap_or_else(|| "Policy event logged".to_string()),
            },
            ActionKind::ExecuteWebhook => Self::ExecuteWebhook {
                url: required_text(p, "url")?,
                method: optional_text(p, "method").unwrap_or_else(|| "POST".to_string()),
                headers: object(p.get("headers")),
                data: p.get("data").cloned().unwrap_or_else(|| json!({})),
            },
            ActionKind::ChainPolicy | ActionKind::Abort | ActionKind::Skip => return Ok(None),
        };

        Ok(Some(command))
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::CreateMemory { .. } => ActionKind::CreateMemory,
            Self::RecallMemory { .. } => ActionKind::RecallMemory,
            Self::UpdateMemory { .. } => ActionKind::UpdateMemory,
            Self::DeleteMemory { .. } => ActionKind::DeleteMemory,
            Self::ArchiveMemory { .. } => ActionKind::ArchiveMemory,
            Self::SetQualityScore { .. } => ActionKind::SetQualityScore,
            Self::AddTag { .. } => ActionKind::AddTag,
            Self::RemoveTag { .. } => ActionKind::RemoveTag,
            Self::TriggerAlert { .. } => ActionKind::TriggerAlert,
            Self::LogEvent { .. } => ActionKind::LogEvent,
            Self::ExecuteWebhook { .. } => ActionKind::ExecuteWebhook,
        }
    }
}

/// 执行提示：超时与重试参数交给处理器自行决定如何使用
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExecutionHints {
    pub async_execution: bool,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
}

impl ExecutionHints {
    pub fn from_action(action: &Action) -> Self {
        Self {
            async_execution: action.async_execution,
            retry_count: action.retry_count,
            retry_delay: Duration::try_from_secs_f64(action.retry_delay).unwrap_or_default(),
            timeout: action
                .timeout
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }
}

/// 动作处理器接口
///
/// `dispatch` 在引擎内部锁持有期间被同步调用。该锁不可重入，实现中不得再调用
/// 同一个 `PolicyEngine` 的任何方法，否则会死锁。需要回调引擎时，应先把命令
/// 投递到队列或其他线程，待 `execute_rules` 返回后再处理。
///
/// `ExecutionHints` 中的异步、重试与超时字段仅供参考，由实现自行决定是否遵循。
#[cfg_attr(test, mockall::automock)]
pub trait ActionHandler: Send + Sync {
    /// 执行命令，返回结果值
    fn dispatch(
        &self,
        command: &ActionCommand,
        context: &EvaluationContext,
        hints: &ExecutionHints,
    ) -> Result<Value, HandlerError>;
}

/// 默认处理器：只记录日志并返回模拟结果
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActionHandler;

impl ActionHandler for TracingActionHandler {
    fn dispatch(
        &self,
        command: &ActionCommand,
        _context: &EvaluationContext,
        _hints: &ExecutionHints,
    ) -> Result<Value, HandlerError> {
        match command {
            ActionCommand::CreateMemory { content, tags, .. } => {
                info!(content_len = content.chars().count(), tags = ?tags, "策略动作: 创建记忆");
                Ok(json!(format!("memory_created_{}", Uuid::now_v7())))
            }
            ActionCommand::RecallMemory {
                query,
                memory_id,
                limit,
            } => {
                info!(query = ?query, memory_id = ?memory_id, "策略动作: 召回记忆");
                let ids: Vec<String> = (0..(*limit).min(3))
                    .map(|i| format!("recalled_memory_{}", i))
                    .collect();
                Ok(json!(ids))
            }
            ActionCommand::UpdateMemory { memory_id, updates } => {
                info!(memory_id = ?memory_id, updates = updates.len(), "策略动作: 更新记忆");
                Ok(Value::Bool(true))
            }
            ActionCommand::DeleteMemory { memory_id } => {
                info!(memory_id = ?memory_id, "策略动作: 删除记忆");
                Ok(Value::Bool(true))
            }
            ActionCommand::ArchiveMemory {
                memory_id,
                archive_location,
            } => {
                info!(memory_id = ?memory_id, archive_location = %archive_location, "策略动作: 归档记忆");
                Ok(Value::Bool(true))
            }
            ActionCommand::SetQualityScore { memory_id, score } => {
                info!(memory_id = ?memory_id, score, "策略动作: 设置质量分数");
                Ok(Value::Bool(true))
            }
            ActionCommand::AddTag { memory_id, tag } => {
                info!(memory_id = ?memory_id, tag = %tag, "策略动作: 添加标签");
                Ok(Value::Bool(true))
            }
            ActionCommand::RemoveTag { memory_id, tag } => {
                info!(memory_id = ?memory_id, tag = ?tag, "策略动作: 移除标签");
                Ok(Value::Bool(true))
            }
            ActionCommand::TriggerAlert {
                alert_type,
                message,
            } => {
                warn!(alert_type = %alert_type, "策略告警: {}", message);
                Ok(Value::Bool(true))
            }
            ActionCommand::LogEvent { level, message } => {
                match level.to_lowercase().as_str() {
                    "error" | "critical" => error!("策略事件: {}", message),
                    "warn" | "warning" => warn!("策略事件: {}", message),
                    "debug" => debug!("策略事件: {}", message),
                    "trace" => trace!("策略事件: {}", message),
                    _ => info!("策略事件: {}", message),
                }
                Ok(Value::Bool(true))
            }
            ActionCommand::ExecuteWebhook { url, method, .. } => {
                info!(method = %method, url = %url, "策略动作: 调用 Webhook");
                Ok(Value::Bool(true))
            }
        }
    }
}

/// 文本参数：字符串原样返回，其他非空值取 JSON 文本
fn optional_text(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn required_text(params: &Map<String, Value>, key: &str) -> Result<String, HandlerError> {
    optional_text(params, key)
        .ok_or_else(|| HandlerError::InvalidParameters(format!("缺少参数 '{}'", key)))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn object(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}
