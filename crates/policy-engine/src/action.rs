//! 策略动作定义

use crate::condition::Condition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateMemory,
    RecallMemory,
    UpdateMemory,
    DeleteMemory,
    ArchiveMemory,
    SetQualityScore,
    AddTag,
    RemoveTag,
    TriggerAlert,
    LogEvent,
    ExecuteWebhook,
    ChainPolicy,
    Abort,
    Skip,
}

impl ActionKind {
    /// 控制类动作由引擎自身处理，不会分发给外部处理器
    pub fn is_control(self) -> bool {
        matches!(self, Self::Abort | Self::Skip | Self::ChainPolicy)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateMemory => "create_memory",
            Self::RecallMemory => "recall_memory",
            Self::UpdateMemory => "update_memory",
            Self::DeleteMemory => "delete_memory",
            Self::ArchiveMemory => "archive_memory",
            Self::SetQualityScore => "set_quality_score",
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::TriggerAlert => "trigger_alert",
            Self::LogEvent => "log_event",
            Self::ExecuteWebhook => "execute_webhook",
            Self::ChainPolicy => "chain_policy",
            Self::Abort => "abort",
            Self::Skip => "skip",
        };
        write!(f, "{}", s)
    }
}

fn default_retry_delay() -> f64 {
    1.0
}

/// 策略动作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// 动作级守卫条件，不满足时跳过该动作
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub priority: u32,
    /// 仅作为提示交给外部调度器，引擎本身同步执行
    #[serde(default)]
    pub async_execution: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            parameters: Map::new(),
            condition: None,
            priority: 0,
            async_execution: false,
            retry_count: 0,
            retry_delay: default_retry_delay(),
            timeout: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// CHAIN_POLICY 的目标规则名
    pub fn chain_target(&self) -> Option<&str> {
        match self.kind {
            ActionKind::ChainPolicy => self.param_str("policy_name"),
            _ => None,
        }
    }

    /// 校验动作的必填参数与数值字段，返回全部错误
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.retry_delay.is_nan() || self.retry_delay < 0.0 {
            errors.push("retry_delay 不能为负数".to_string());
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_nan() || timeout <= 0.0 {
                errors.push("timeout 必须为正数".to_string());
            }
        }

        match self.kind {
            ActionKind::CreateMemory => self.require(&mut errors, "content"),
            ActionKind::RecallMemory => {
                if self.param("query").is_none() && self.param("memory_id").is_none() {
                    errors.push("RECALL_MEMORY 动作需要 'query' 或 'memory_id' 参数".to_string());
                }
            }
            ActionKind::SetQualityScore => match self.param("score") {
                None => errors.push("SET_QUALITY_SCORE 动作需要 'score' 参数".to_string()),
                Some(score) => match score.as_f64() {
                    Some(s) if (0.0..=1.0).contains(&s) => {}
                    Some(_) => errors.push("质量分数必须在 0 到 1 之间".to_string()),
                    None => errors.push("质量分数必须是数字".to_string()),
                },
            },
            ActionKind::AddTag => self.require(&mut errors, "tag"),
            ActionKind::ExecuteWebhook => self.require(&mut errors, "url"),
            ActionKind::ChainPolicy => self.require(&mut errors, "policy_name"),
            ActionKind::UpdateMemory
            | ActionKind::DeleteMemory
            | ActionKind::ArchiveMemory
            | ActionKind::RemoveTag
            | ActionKind::TriggerAlert
            | ActionKind::LogEvent
            | ActionKind::Abort
            | ActionKind::Skip => {}
        }

        errors
    }

    fn require(&self, errors: &mut Vec<String>, key: &str) {
        if self.param(key).is_none() {
            errors.push(format!(
                "{} 动作需要 '{}' 参数",
                self.kind.to_string().to_uppercase(),
                key
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_parameters() {
        assert_eq!(Action::new(ActionKind::CreateMemory).validate().len(), 1);
        assert!(
            Action::new(ActionKind::CreateMemory)
                .with_param("content", "x")
                .validate()
                .is_empty()
        );
        assert_eq!(Action::new(ActionKind::RecallMemory).validate().len(), 1);
        assert!(
            Action::new(ActionKind::RecallMemory)
                .with_param("memory_id", "m-1")
                .validate()
                .is_empty()
        );
        assert_eq!(Action::new(ActionKind::AddTag).validate().len(), 1);
        assert_eq!(Action::new(ActionKind::ExecuteWebhook).validate().len(), 1);
        assert_eq!(Action::new(ActionKind::ChainPolicy).validate().len(), 1);
        assert!(Action::new(ActionKind::Abort).validate().is_empty());
        assert!(Action::new(ActionKind::LogEvent).validate().is_empty());
    }

    #[test]
    fn test_quality_score_range() {
        let ok = Action::new(ActionKind::SetQualityScore).with_param("score", 0.8);
        assert!(ok.validate().is_empty());

        let high = Action::new(ActionKind::SetQualityScore).with_param("score", 1.5);
        assert_eq!(high.validate(), vec!["质量分数必须在 0 到 1 之间".to_string()]);

        let text = Action::new(ActionKind::SetQualityScore).with_param("score", "high");
        assert_eq!(text.validate(), vec!["质量分数必须是数字".to_string()]);
    }

    #[test]
    fn test_numeric_fields() {
        let mut action = Action::new(ActionKind::Skip).with_timeout(0.0);
        action.retry_delay = -1.0;
        assert_eq!(action.validate().len(), 2);
    }

    #[test]
    fn test_deserialize_defaults() {
        let action: Action = serde_json::from_value(json!({
            "type": "log_event",
            "parameters": {"message": "hi"}
        }))
        .unwrap();
        assert_eq!(action.kind, ActionKind::LogEvent);
        assert_eq!(action.priority, 0);
        assert_eq!(action.retry_delay, 1.0);
        assert!(action.timeout.is_none());
        assert!(action.condition.is_none());
    }

    #[test]
    fn test_chain_target() {
        let chain = Action::new(ActionKind::ChainPolicy).with_param("policy_name", "next");
        assert_eq!(chain.chain_target(), Some("next"));
        assert_eq!(Action::new(ActionKind::Skip).chain_target(), None);
    }
}
