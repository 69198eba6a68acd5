//! 策略条件定义
//!
//! 条件在内存中是一个封闭的枚举 [`Predicate`]，每个变体只携带该类型需要的字段；
//! 持久化格式是扁平的 [`ConditionRecord`]（`type` + 可选字段），反序列化时经
//! `TryFrom` 校验，字段组合不合法的条件无法被构造出来。

use crate::error::PolicyError;
use chrono::NaiveTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const TIME_FORMAT: &str = "%H:%M";

/// 条件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Always,
    Never,
    Equals,
    NotEquals,
    Contains,
    NotContains,
    MatchesRegex,
    GreaterThan,
    LessThan,
    Between,
    InList,
    NotInList,
    TimeRange,
    RateLimit,
    Probability,
    CompositeAnd,
    CompositeOr,
}

impl ConditionKind {
    pub fn is_composite(self) -> bool {
        matches!(self, Self::CompositeAnd | Self::CompositeOr)
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Always => "always",
            Self::Never => "never",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::MatchesRegex => "matches_regex",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Between => "between",
            Self::InList => "in_list",
            Self::NotInList => "not_in_list",
            Self::TimeRange => "time_range",
            Self::RateLimit => "rate_limit",
            Self::Probability => "probability",
            Self::CompositeAnd => "composite_and",
            Self::CompositeOr => "composite_or",
        };
        write!(f, "{}", s)
    }
}

/// 条件谓词
#[derive(Debug, Clone)]
pub enum Predicate {
    Always,
    Never,
    Equals { field: Option<String>, value: Value },
    NotEquals { field: Option<String>, value: Value },
    Contains { field: Option<String>, value: Value },
    NotContains { field: Option<String>, value: Value },
    MatchesRegex { field: Option<String>, pattern: Regex },
    GreaterThan { field: Option<String>, value: Value },
    LessThan { field: Option<String>, value: Value },
    Between { field: Option<String>, min: f64, max: f64 },
    InList { field: Option<String>, values: Vec<Value> },
    NotInList { field: Option<String>, values: Vec<Value> },
    TimeRange { start: NaiveTime, end: NaiveTime },
    RateLimit {
        field: Option<String>,
        limit: u32,
        window_secs: u64,
    },
    Probability { probability: f64 },
    CompositeAnd(Vec<Condition>),
    CompositeOr(Vec<Condition>),
}

impl Predicate {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Self::Always => ConditionKind::Always,
            Self::Never => ConditionKind::Never,
            Self::Equals { .. } => ConditionKind::Equals,
            Self::NotEquals { .. } => ConditionKind::NotEquals,
            Self::Contains { .. } => ConditionKind::Contains,
            Self::NotContains { .. } => ConditionKind::NotContains,
            Self::MatchesRegex { .. } => ConditionKind::MatchesRegex,
            Self::GreaterThan { .. } => ConditionKind::GreaterThan,
            Self::LessThan { .. } => ConditionKind::LessThan,
            Self::Between { .. } => ConditionKind::Between,
            Self::InList { .. } => ConditionKind::InList,
            Self::NotInList { .. } => ConditionKind::NotInList,
            Self::TimeRange { .. } => ConditionKind::TimeRange,
            Self::RateLimit { .. } => ConditionKind::RateLimit,
            Self::Probability { .. } => ConditionKind::Probability,
            Self::CompositeAnd(_) => ConditionKind::CompositeAnd,
            Self::CompositeOr(_) => ConditionKind::CompositeOr,
        }
    }
}

/// 策略条件：谓词 + 取反标记
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ConditionRecord", into = "ConditionRecord")]
pub struct Condition {
    predicate: Predicate,
    negate: bool,
}

impl Condition {
    fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            negate: false,
        }
    }

    pub fn always() -> Self {
        Self::new(Predicate::Always)
    }

    pub fn never() -> Self {
        Self::new(Predicate::Never)
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(Predicate::Equals {
            field: Some(field.into()),
            value: value.into(),
        })
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(Predicate::NotEquals {
            field: Some(field.into()),
            value: value.into(),
        })
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(Predicate::Contains {
            field: Some(field.into()),
            value: value.into(),
        })
    }

    pub fn not_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(Predicate::NotContains {
            field: Some(field.into()),
            value: value.into(),
        })
    }

    pub fn matches_regex(field: impl Into<String>, pattern: &str) -> Result<Self, PolicyError> {
        let pattern = compile_regex(pattern)?;
        Ok(Self::new(Predicate::MatchesRegex {
            field: Some(field.into()),
            pattern,
        }))
    }

    pub fn greater_than(field: impl Into<String>, threshold: f64) -> Self {
        Self::new(Predicate::GreaterThan {
            field: Some(field.into()),
            value: Value::from(threshold),
        })
    }

    pub fn less_than(field: impl Into<String>, threshold: f64) -> Self {
        Self::new(Predicate::LessThan {
            field: Some(field.into()),
            value: Value::from(threshold),
        })
    }

    pub fn between(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self::new(Predicate::Between {
            field: Some(field.into()),
            min,
            max,
        })
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Result<Self, PolicyError> {
        require_values(ConditionKind::InList, &values)?;
        Ok(Self::new(Predicate::InList {
            field: Some(field.into()),
            values,
        }))
    }

    pub fn not_in_list(field: impl Into<String>, values: Vec<Value>) -> Result<Self, PolicyError> {
        require_values(ConditionKind::NotInList, &values)?;
        Ok(Self::new(Predicate::NotInList {
            field: Some(field.into()),
            values,
        }))
    }

    /// 时间段条件，`start` 晚于 `end` 时表示跨越午夜（如 22:00-06:00）
    pub fn time_range(start: &str, end: &str) -> Result<Self, PolicyError> {
        Ok(Self::new(Predicate::TimeRange {
            start: parse_time("start_time", start)?,
            end: parse_time("end_time", end)?,
        }))
    }

    /// 限流条件：`window_secs` 秒内最多放行 `limit` 次，`field` 为空时全局计数
    pub fn rate_limit(field: Option<&str>, limit: u32, window_secs: u64) -> Result<Self, PolicyError> {
        if limit == 0 || window_secs == 0 {
            return Err(invalid(
                ConditionKind::RateLimit,
                "rate_limit 与 time_window 必须为正数",
            ));
        }
        Ok(Self::new(Predicate::RateLimit {
            field: field.map(str::to_string),
            limit,
            window_secs,
        }))
    }

    pub fn probability(probability: f64) -> Result<Self, PolicyError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(invalid(
                ConditionKind::Probability,
                "probability 必须在 0 到 1 之间",
            ));
        }
        Ok(Self::new(Predicate::Probability { probability }))
    }

    pub fn all(sub_conditions: Vec<Condition>) -> Result<Self, PolicyError> {
        require_subs(ConditionKind::CompositeAnd, &sub_conditions)?;
        Ok(Self::new(Predicate::CompositeAnd(sub_conditions)))
    }

    pub fn any(sub_conditions: Vec<Condition>) -> Result<Self, PolicyError> {
        require_subs(ConditionKind::CompositeOr, &sub_conditions)?;
        Ok(Self::new(Predicate::CompositeOr(sub_conditions)))
    }

    /// 返回取反后的条件
    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn kind(&self) -> ConditionKind {
        self.predicate.kind()
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    /// 条件引用的上下文字段路径
    pub fn field(&self) -> Option<&str> {
        match &self.predicate {
            Predicate::Equals { field, .. }
            | Predicate::NotEquals { field, .. }
            | Predicate::Contains { field, .. }
            | Predicate::NotContains { field, .. }
            | Predicate::MatchesRegex { field, .. }
            | Predicate::GreaterThan { field, .. }
            | Predicate::LessThan { field, .. }
            | Predicate::Between { field, .. }
            | Predicate::InList { field, .. }
            | Predicate::NotInList { field, .. }
            | Predicate::RateLimit { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// 深度优先遍历条件树（包含自身）
    pub fn visit<F: FnMut(&Condition)>(&self, visitor: &mut F) {
        visitor(self);
        if let Predicate::CompositeAnd(subs) | Predicate::CompositeOr(subs) = &self.predicate {
            for sub in subs {
                sub.visit(visitor);
            }
        }
    }
}

fn invalid(kind: ConditionKind, message: impl Into<String>) -> PolicyError {
    PolicyError::InvalidCondition {
        kind: kind.to_string(),
        message: message.into(),
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, PolicyError> {
    if pattern.is_empty() {
        return Err(invalid(ConditionKind::MatchesRegex, "regex_pattern 不能为空"));
    }
    Regex::new(pattern).map_err(|e| {
        invalid(
            ConditionKind::MatchesRegex,
            format!("无效的正则表达式 '{}': {}", pattern, e),
        )
    })
}

fn parse_time(name: &str, s: &str) -> Result<NaiveTime, PolicyError> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).map_err(|_| {
        invalid(
            ConditionKind::TimeRange,
            format!("{} 格式无效，期望 HH:MM，实际 '{}'", name, s),
        )
    })
}

fn require_values(kind: ConditionKind, values: &[Value]) -> Result<(), PolicyError> {
    if values.is_empty() {
        return Err(invalid(kind, "values 不能为空"));
    }
    Ok(())
}

fn require_subs(kind: ConditionKind, subs: &[Condition]) -> Result<(), PolicyError> {
    if subs.is_empty() {
        return Err(invalid(kind, "复合条件需要 sub_conditions"));
    }
    Ok(())
}

/// 条件的持久化格式
///
/// 与配置文件中的写法一一对应：`type` 决定哪些可选字段是必填的。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRecord {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub negate: bool,
}

impl ConditionRecord {
    fn empty(kind: ConditionKind, negate: bool) -> Self {
        Self {
            kind,
            field: None,
            value: None,
            values: None,
            regex_pattern: None,
            min_value: None,
            max_value: None,
            start_time: None,
            end_time: None,
            rate_limit: None,
            time_window: None,
            probability: None,
            sub_conditions: None,
            negate,
        }
    }
}

impl TryFrom<ConditionRecord> for Condition {
    type Error = PolicyError;

    fn try_from(record: ConditionRecord) -> Result<Self, Self::Error> {
        let kind = record.kind;
        let field = record.field;
        // 缺省 value 与显式 null 等价
        let value = record.value.unwrap_or(Value::Null);

        let predicate = match kind {
            ConditionKind::Always => Predicate::Always,
            ConditionKind::Never => Predicate::Never,
            ConditionKind::Equals => Predicate::Equals { field, value },
            ConditionKind::NotEquals => Predicate::NotEquals { field, value },
            ConditionKind::Contains => Predicate::Contains { field, value },
            ConditionKind::NotContains => Predicate::NotContains { field, value },
            ConditionKind::MatchesRegex => {
                let pattern = record.regex_pattern.ok_or_else(|| {
                    invalid(kind, "MATCHES_REGEX 条件需要 regex_pattern")
                })?;
                Predicate::MatchesRegex {
                    field,
                    pattern: compile_regex(&pattern)?,
                }
            }
            ConditionKind::GreaterThan => Predicate::GreaterThan { field, value },
            ConditionKind::LessThan => Predicate::LessThan { field, value },
            ConditionKind::Between => match (record.min_value, record.max_value) {
                (Some(min), Some(max)) => Predicate::Between { field, min, max },
                _ => return Err(invalid(kind, "BETWEEN 条件需要 min_value 与 max_value")),
            },
            ConditionKind::InList | ConditionKind::NotInList => {
                let values = record.values.unwrap_or_default();
                require_values(kind, &values)?;
                if kind == ConditionKind::InList {
                    Predicate::InList { field, values }
                } else {
                    Predicate::NotInList { field, values }
                }
            }
            ConditionKind::TimeRange => match (record.start_time, record.end_time) {
                (Some(start), Some(end)) => Predicate::TimeRange {
                    start: parse_time("start_time", &start)?,
                    end: parse_time("end_time", &end)?,
                },
                _ => return Err(invalid(kind, "TIME_RANGE 条件需要 start_time 与 end_time")),
            },
            ConditionKind::RateLimit => match (record.rate_limit, record.time_window) {
                (Some(limit), Some(window_secs)) if limit > 0 && window_secs > 0 => {
                    Predicate::RateLimit {
                        field,
                        limit,
                        window_secs,
                    }
                }
                _ => {
                    return Err(invalid(
                        kind,
                        "RATE_LIMIT 条件需要正数的 rate_limit 与 time_window",
                    ));
                }
            },
            ConditionKind::Probability => match record.probability {
                Some(p) if (0.0..=1.0).contains(&p) => Predicate::Probability { probability: p },
                _ => return Err(invalid(kind, "probability 必须在 0 到 1 之间")),
            },
            ConditionKind::CompositeAnd | ConditionKind::CompositeOr => {
                let subs = record.sub_conditions.unwrap_or_default();
                require_subs(kind, &subs)?;
                if kind == ConditionKind::CompositeAnd {
                    Predicate::CompositeAnd(subs)
                } else {
                    Predicate::CompositeOr(subs)
                }
            }
        };

        Ok(Self {
            predicate,
            negate: record.negate,
        })
    }
}

impl From<Condition> for ConditionRecord {
    fn from(condition: Condition) -> Self {
        let mut record = ConditionRecord::empty(condition.kind(), condition.negate);

        match condition.predicate {
            Predicate::Always | Predicate::Never => {}
            Predicate::Equals { field, value }
            | Predicate::NotEquals { field, value }
            | Predicate::Contains { field, value }
            | Predicate::NotContains { field, value }
            | Predicate::GreaterThan { field, value }
            | Predicate::LessThan { field, value } => {
                record.field = field;
                record.value = (!value.is_null()).then_some(value);
            }
            Predicate::MatchesRegex { field, pattern } => {
                record.field = field;
                record.regex_pattern = Some(pattern.as_str().to_string());
            }
            Predicate::Between { field, min, max } => {
                record.field = field;
                record.min_value = Some(min);
                record.max_value = Some(max);
            }
            Predicate::InList { field, values } | Predicate::NotInList { field, values } => {
                record.field = field;
                record.values = Some(values);
            }
            Predicate::TimeRange { start, end } => {
                record.start_time = Some(start.format(TIME_FORMAT).to_string());
                record.end_time = Some(end.format(TIME_FORMAT).to_string());
            }
            Predicate::RateLimit {
                field,
                limit,
                window_secs,
            } => {
                record.field = field;
                record.rate_limit = Some(limit);
                record.time_window = Some(window_secs);
            }
            Predicate::Probability { probability } => {
                record.probability = Some(probability);
            }
            Predicate::CompositeAnd(subs) | Predicate::CompositeOr(subs) => {
                record.sub_conditions = Some(subs);
            }
        }

        record
    }
}
