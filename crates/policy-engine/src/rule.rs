//! 策略规则定义

use crate::action::Action;
use crate::condition::Condition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 规则适用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Agent,
    Workflow,
    Task,
    User,
    Session,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::Global,
        Scope::Agent,
        Scope::Workflow,
        Scope::Task,
        Scope::User,
        Scope::Session,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Agent => "agent",
            Self::Workflow => "workflow",
            Self::Task => "task",
            Self::User => "user",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str() == lower)
            .ok_or_else(|| format!("未知的规则范围: {}", s))
    }
}

/// 规则条件的组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

fn default_enabled() -> bool {
    true
}

/// 策略规则
///
/// `execution_count` 与 `last_execution` 属于运行时状态，不参与序列化，
/// 导入时从零开始。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, rename = "condition_operator", alias = "combinator")]
    pub combinator: Combinator,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub max_executions: Option<u32>,
    #[serde(default, with = "cooldown_secs")]
    pub cooldown_period: Option<Duration>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(skip)]
    execution_count: u32,
    #[serde(skip)]
    last_execution: Option<DateTime<Utc>>,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            priority: 0,
            scope: Scope::Global,
            conditions: Vec::new(),
            combinator: Combinator::And,
            actions: Vec::new(),
            max_executions: None,
            cooldown_period: None,
            tags: BTreeSet::new(),
            metadata: Map::new(),
            execution_count: 0,
            last_execution: None,
        }
    }

    /// 从文档条目解析规则，条目缺少 `name` 时使用键名
    pub fn from_entry(name: &str, entry: &Value) -> serde_json::Result<Self> {
        let mut entry = entry.clone();
        if let Value::Object(map) = &mut entry {
            map.entry("name")
                .or_insert_with(|| Value::String(name.to_string()));
        }
        serde_json::from_value(entry)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_combinator(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_max_executions(mut self, max: u32) -> Self {
        self.max_executions = Some(max);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_period = Some(cooldown);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.last_execution
    }

    /// 执行门控：启用状态、执行次数上限、冷却期
    pub fn can_execute(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(max) = self.max_executions {
            if self.execution_count >= max {
                return false;
            }
        }

        if let (Some(cooldown), Some(last)) = (self.cooldown_period, self.last_execution) {
            let cooldown = chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);
            if now - last < cooldown {
                return false;
            }
        }

        true
    }

    /// 记录一次执行
    pub fn record_execution(&mut self, now: DateTime<Utc>) {
        self.execution_count = self.execution_count.saturating_add(1);
        self.last_execution = Some(now);
    }
}

/// 冷却期以秒数（浮点）序列化，0 视为未设置
mod cooldown_secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            None => Ok(None),
            Some(secs) if secs == 0.0 => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|_| D::Error::custom(format!("cooldown_period 无效: {}", secs))),
        }
    }
}
