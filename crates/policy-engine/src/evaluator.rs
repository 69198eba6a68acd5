//! 条件评估器
//!
//! 把 [`Condition`] 与 [`EvaluationContext`] 计算为布尔值。评估永不返回错误：
//! 内部故障记录日志后按 `false` 处理（fail-closed），且故障结果不再取反。

use crate::clock::{Clock, SystemClock};
use crate::condition::{Condition, Predicate};
use crate::context::EvaluationContext;
use crate::error::{PolicyError, Result};
use crate::random::{RandomSource, StdRandom};
use chrono::{DateTime, NaiveTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// 条件评估器
///
/// 持有限流条件的放行历史，这是规则目录之外唯一的长期状态。
pub struct ConditionEvaluator {
    clock: Arc<dyn Clock>,
    random: Box<dyn RandomSource>,
    rate_limits: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Box::new(StdRandom::from_entropy()))
    }
}

impl ConditionEvaluator {
    pub fn new(clock: Arc<dyn Clock>, random: Box<dyn RandomSource>) -> Self {
        Self {
            clock,
            random,
            rate_limits: HashMap::new(),
        }
    }

    /// 评估条件
    ///
    /// 先计算谓词，再应用 `negate`；计算过程出错时直接返回 false。
    pub fn evaluate(&mut self, condition: &Condition, context: &EvaluationContext) -> bool {
        match self.check(condition.predicate(), context) {
            Ok(result) => result != condition.is_negated(),
            Err(e) => {
                warn!(kind = %condition.kind(), error = %e, "条件评估失败，按不满足处理");
                metrics::counter!("policy_condition_faults_total", "kind" => condition.kind().to_string())
                    .increment(1);
                false
            }
        }
    }

    /// 清空全部限流历史
    pub fn clear_rate_limits(&mut self) {
        self.rate_limits.clear();
    }

    /// 当前跟踪的限流键数量
    pub fn rate_limit_keys(&self) -> usize {
        self.rate_limits.len()
    }

    fn check(&mut self, predicate: &Predicate, context: &EvaluationContext) -> Result<bool> {
        match predicate {
            Predicate::Always => Ok(true),
            Predicate::Never => Ok(false),
            Predicate::Equals { field, value } => {
                Ok(values_equal(context.resolve(field.as_deref()), value))
            }
            Predicate::NotEquals { field, value } => {
                Ok(!values_equal(context.resolve(field.as_deref()), value))
            }
            Predicate::Contains { field, value } => {
                Ok(contains(context.resolve(field.as_deref()), value)?.unwrap_or(false))
            }
            Predicate::NotContains { field, value } => {
                // 非容器不包含任何东西
                Ok(contains(context.resolve(field.as_deref()), value)?.is_none_or(|hit| !hit))
            }
            Predicate::MatchesRegex { field, pattern } => {
                Ok(match context.resolve(field.as_deref()) {
                    Value::String(s) => pattern.is_match(s),
                    _ => false,
                })
            }
            Predicate::GreaterThan { field, value } => {
                Ok(compare(context.resolve(field.as_deref()), value, |a, b| a > b))
            }
            Predicate::LessThan { field, value } => {
                Ok(compare(context.resolve(field.as_deref()), value, |a, b| a < b))
            }
            Predicate::Between { field, min, max } => {
                Ok(match coerce_f64(context.resolve(field.as_deref())) {
                    Some(n) => *min <= n && n <= *max,
                    None => false,
                })
            }
            Predicate::InList { field, values } => {
                let actual = context.resolve(field.as_deref());
                Ok(values.iter().any(|v| values_equal(actual, v)))
            }
            Predicate::NotInList { field, values } => {
                let actual = context.resolve(field.as_deref());
                Ok(!values.iter().any(|v| values_equal(actual, v)))
            }
            Predicate::TimeRange { start, end } => {
                Ok(in_time_range(self.clock.time_of_day(), *start, *end))
            }
            Predicate::RateLimit {
                field,
                limit,
                window_secs,
            } => {
                let key = rate_limit_key(field.as_deref(), context);
                Ok(self.admit(key, *limit, *window_secs))
            }
            Predicate::Probability { probability } => Ok(self.random.next_unit() < *probability),
            Predicate::CompositeAnd(subs) => {
                for sub in subs {
                    if !self.evaluate(sub, context) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::CompositeOr(subs) => {
                for sub in subs {
                    if self.evaluate(sub, context) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// 滑动窗口放行：先剔除过期记录，未达上限才记录本次
    fn admit(&mut self, key: String, limit: u32, window_secs: u64) -> bool {
        let now = self.clock.now();
        let window = i64::try_from(window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        let history = self.rate_limits.entry(key).or_default();

        while let Some(oldest) = history.front() {
            if now - *oldest >= window {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() < limit as usize {
            history.push_back(now);
            true
        } else {
            debug!(count = history.len(), limit, "限流窗口已满");
            false
        }
    }
}

/// 值相等比较，数值统一按浮点数比较（1 == 1.0）
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// 数值强制转换：数字、数字文本、布尔值
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn compare<F>(actual: &Value, threshold: &Value, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    let threshold = match threshold {
        Value::Number(_) | Value::Bool(_) => coerce_f64(threshold),
        _ => None,
    };
    match (coerce_f64(actual), threshold) {
        (Some(a), Some(t)) => cmp(a, t),
        _ => false,
    }
}

/// 包含检查：文本做子串匹配，数组做成员匹配，其他类型返回 None
fn contains(haystack: &Value, needle: &Value) -> Result<Option<bool>> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(Some(s.contains(n.as_str()))),
            other => Err(PolicyError::EvaluationError(format!(
                "子串匹配需要文本，实际为 {}",
                type_name(other)
            ))),
        },
        Value::Array(items) => Ok(Some(items.iter().any(|item| values_equal(item, needle)))),
        _ => Ok(None),
    }
}

/// 时间段判断，`start > end` 时跨越午夜
pub fn in_time_range(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

fn rate_limit_key(field: Option<&str>, context: &EvaluationContext) -> String {
    let base = field.unwrap_or("global");
    match context.resolve(field) {
        Value::Null => base.to_string(),
        Value::String(s) => format!("{}:{}", base, s),
        other => format!("{}:{}", base, other),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
