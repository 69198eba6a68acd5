//! 规则校验
//!
//! 错误会导致规则被拒绝；警告只记录日志。

use crate::action::ActionKind;
use crate::condition::Predicate;
use crate::rule::Rule;
use serde::Serialize;

/// 建议的单条规则最大动作数
pub const MAX_RECOMMENDED_ACTIONS: usize = 10;
/// 建议的记忆内容最大长度（字符）
pub const MAX_RECOMMENDED_CONTENT_CHARS: usize = 10_000;
/// 建议的限流上限（每秒放行次数）
pub const MAX_RECOMMENDED_RATE_PER_SEC: f64 = 100.0;
/// 建议的顶层复合条件最大数量
pub const MAX_RECOMMENDED_COMPOSITE_CONDITIONS: usize = 3;

/// 校验报告
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 校验规则
pub fn validate_rule(rule: &Rule) -> ValidationReport {
    let mut report = ValidationReport::default();

    if rule.name.trim().is_empty() {
        report.errors.push("规则名称不能为空".to_string());
    }
    if rule.conditions.is_empty() {
        report.errors.push("至少需要一个条件".to_string());
    }
    if rule.actions.is_empty() {
        report.errors.push("至少需要一个动作".to_string());
    }
    if rule.max_executions == Some(0) {
        report.errors.push("max_executions 必须为正数".to_string());
    }

    for (i, action) in rule.actions.iter().enumerate() {
        for error in action.validate() {
            report.errors.push(format!("动作 {}: {}", i, error));
        }

        if action.chain_target() == Some(rule.name.as_str()) {
            report
                .errors
                .push(format!("动作 {}: CHAIN_POLICY 不能链接到规则自身", i));
        }

        match action.kind {
            ActionKind::ExecuteWebhook => {
                if let Some(url) = action.param_str("url") {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        report
                            .warnings
                            .push(format!("动作 {}: Webhook URL 建议使用 http/https: {}", i, url));
                    }
                }
            }
            ActionKind::CreateMemory => {
                if let Some(content) = action.param_str("content") {
                    let len = content.chars().count();
                    if len > MAX_RECOMMENDED_CONTENT_CHARS {
                        report.warnings.push(format!(
                            "动作 {}: 记忆内容过长 ({} 字符)，可能影响性能",
                            i, len
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    let mut check_rate = |predicate: &Predicate| {
        if let Predicate::RateLimit {
            limit, window_secs, ..
        } = predicate
        {
            let per_sec = f64::from(*limit) / *window_secs as f64;
            if per_sec > MAX_RECOMMENDED_RATE_PER_SEC {
                report.warnings.push(format!(
                    "限流阈值过高 ({:.1} 次/秒)，可能失去限流效果",
                    per_sec
                ));
            }
        }
    };
    for condition in rule
        .conditions
        .iter()
        .chain(rule.actions.iter().filter_map(|a| a.condition.as_ref()))
    {
        condition.visit(&mut |c| check_rate(c.predicate()));
    }

    if rule.actions.len() > MAX_RECOMMENDED_ACTIONS {
        report.warnings.push(format!(
            "动作数量较多 ({})，建议拆分为多条规则",
            rule.actions.len()
        ));
    }

    let composites = rule
        .conditions
        .iter()
        .filter(|c| c.kind().is_composite())
        .count();
    if composites > MAX_RECOMMENDED_COMPOSITE_CONDITIONS {
        report.warnings.push(format!(
            "条件结构较复杂 ({} 个复合条件)，建议简化",
            composites
        ));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::condition::Condition;

    fn valid_rule() -> Rule {
        Rule::new("ok")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::LogEvent))
    }

    #[test]
    fn test_valid_rule() {
        let report = validate_rule(&valid_rule());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_collects_every_error() {
        let mut rule = Rule::new("").with_max_executions(0);
        rule.actions.push(Action::new(ActionKind::AddTag));
        let report = validate_rule(&rule);
        assert_eq!(report.errors.len(), 4);
        assert!(report.errors.iter().any(|e| e.contains("名称")));
        assert!(report.errors.iter().any(|e| e.contains("条件")));
        assert!(report.errors.iter().any(|e| e.contains("max_executions")));
        assert!(report.errors.iter().any(|e| e.starts_with("动作 0")));
    }

    #[test]
    fn test_self_chain_rejected() {
        let rule = valid_rule()
            .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "ok"));
        let report = validate_rule(&rule);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("CHAIN_POLICY"));
    }

    #[test]
    fn test_warnings() {
        let rule = valid_rule()
            .with_condition(Condition::rate_limit(None, 1000, 1).unwrap())
            .with_action(Action::new(ActionKind::ExecuteWebhook).with_param("url", "ftp://x"))
            .with_action(
                Action::new(ActionKind::CreateMemory).with_param("content", "x".repeat(10_001)),
            );
        let report = validate_rule(&rule);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 3);
    }

    #[test]
    fn test_too_many_actions_warning() {
        let mut rule = valid_rule();
        for _ in 0..MAX_RECOMMENDED_ACTIONS {
            rule.actions.push(Action::new(ActionKind::Skip));
        }
        let report = validate_rule(&rule);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_complex_condition_warning() {
        let composite = || {
            Condition::any(vec![Condition::equals("a", 1), Condition::equals("b", 2)]).unwrap()
        };

        let mut rule = valid_rule();
        for _ in 0..MAX_RECOMMENDED_COMPOSITE_CONDITIONS {
            rule.conditions.push(composite());
        }
        assert!(validate_rule(&rule).warnings.is_empty());

        rule.conditions.push(composite());
        let report = validate_rule(&rule);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("4 个复合条件"));
    }
}
