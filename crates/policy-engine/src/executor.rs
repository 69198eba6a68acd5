//! 动作执行器
//!
//! 按优先级执行规则的动作序列，处理守卫条件、ABORT/SKIP 控制动作以及
//! CHAIN_POLICY 链式调用。任何动作失败都只体现在结果中，不会向上抛出。

use crate::action::{Action, ActionKind};
use crate::context::EvaluationContext;
use crate::evaluator::ConditionEvaluator;
use crate::handler::{ActionCommand, ActionHandler, ExecutionHints, HandlerError};
use crate::rule::Rule;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub action_type: ActionKind,
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl ActionOutcome {
    fn ok(kind: ActionKind, result: Value) -> Self {
        Self {
            action_type: kind,
            success: true,
            result,
            error: None,
        }
    }

    fn failed(kind: ActionKind, error: impl Into<String>) -> Self {
        Self {
            action_type: kind,
            success: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// 单条规则的执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleExecutionResult {
    pub rule_name: String,
    pub success: bool,
    pub actions_executed: usize,
    pub action_results: Vec<ActionOutcome>,
    pub error: Option<String>,
}

impl RuleExecutionResult {
    fn new(rule_name: &str) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            success: true,
            actions_executed: 0,
            action_results: Vec::new(),
            error: None,
        }
    }
}

/// 动作执行器
///
/// 借用引擎锁内的状态；链式调用沿调用栈向下传递同一份借用，不会重复加锁。
pub(crate) struct ActionExecutor<'a> {
    pub rules: &'a IndexMap<String, Rule>,
    pub evaluator: &'a mut ConditionEvaluator,
    pub handler: &'a dyn ActionHandler,
    pub max_chain_depth: usize,
    pub now: DateTime<Utc>,
}

impl ActionExecutor<'_> {
    /// 执行规则的全部动作
    pub fn run_rule(&mut self, rule: &Rule, context: &EvaluationContext) -> RuleExecutionResult {
        let mut chain = vec![rule.name.clone()];
        self.run_actions(rule, context, &mut chain)
    }

    fn run_actions(
        &mut self,
        rule: &Rule,
        context: &EvaluationContext,
        chain: &mut Vec<String>,
    ) -> RuleExecutionResult {
        let mut result = RuleExecutionResult::new(&rule.name);

        let mut actions: Vec<&Action> = rule.actions.iter().collect();
        actions.sort_by(|a, b| b.priority.cmp(&a.priority));

        for action in actions {
            if let Some(guard) = &action.condition {
                if !self.evaluator.evaluate(guard, context) {
                    debug!(rule_name = %rule.name, action = %action.kind, "动作守卫条件不满足，跳过");
                    continue;
                }
            }

            let outcome = self.execute_action(action, context, chain);
            if !outcome.success {
                warn!(
                    rule_name = %rule.name,
                    action = %action.kind,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "动作执行失败"
                );
                result.success = false;
            }
            result.action_results.push(outcome);
            result.actions_executed += 1;

            if action.kind == ActionKind::Abort {
                debug!(rule_name = %rule.name, "ABORT: 终止剩余动作");
                break;
            }
        }

        result
    }

    fn execute_action(
        &mut self,
        action: &Action,
        context: &EvaluationContext,
        chain: &mut Vec<String>,
    ) -> ActionOutcome {
        match action.kind {
            ActionKind::ChainPolicy => self.chain(action, context, chain),
            kind if kind.is_control() => ActionOutcome::ok(kind, Value::Null),
            _ => self.dispatch(action, context),
        }
    }

    fn dispatch(&self, action: &Action, context: &EvaluationContext) -> ActionOutcome {
        let command = match ActionCommand::from_action(action) {
            Ok(Some(command)) => command,
            Ok(None) => return ActionOutcome::ok(action.kind, Value::Null),
            Err(e) => return ActionOutcome::failed(action.kind, e.to_string()),
        };
        let hints = ExecutionHints::from_action(action);

        let handler = self.handler;
        let dispatched = catch_unwind(AssertUnwindSafe(|| {
            handler.dispatch(&command, context, &hints)
        }));

        match dispatched {
            Ok(Ok(value)) => ActionOutcome::ok(action.kind, value),
            Ok(Err(e)) => ActionOutcome::failed(action.kind, e.to_string()),
            Err(payload) => ActionOutcome::failed(
                action.kind,
                HandlerError::Failed(panic_message(payload.as_ref())).to_string(),
            ),
        }
    }

    fn chain(
        &mut self,
        action: &Action,
        context: &EvaluationContext,
        chain: &mut Vec<String>,
    ) -> ActionOutcome {
        let kind = action.kind;
        let Some(target_name) = action.param_str("policy_name") else {
            return ActionOutcome::failed(kind, "缺少参数 'policy_name'");
        };

        if chain.iter().any(|name| name == target_name) {
            return ActionOutcome::failed(
                kind,
                format!("检测到循环链接: {} -> {}", chain.join(" -> "), target_name),
            );
        }
        if chain.len() > self.max_chain_depth {
            return ActionOutcome::failed(
                kind,
                format!("链接深度超过上限 {}", self.max_chain_depth),
            );
        }

        // 目标缺失或不可执行时链接本身仍算成功，结果为 false
        let rules = self.rules;
        let Some(target) = rules.get(target_name) else {
            debug!(chain_target = %target_name, "链接的规则不存在");
            return ActionOutcome::ok(kind, Value::Bool(false));
        };
        if !target.can_execute(self.now) {
            debug!(chain_target = %target_name, "链接的规则当前不可执行");
            return ActionOutcome::ok(kind, Value::Bool(false));
        }

        let chained_context = match action.param("context") {
            Some(value) if !value.is_null() => EvaluationContext::new(value.clone()),
            _ => context.clone(),
        };

        debug!(chain_target = %target_name, depth = chain.len(), "链接到规则");
        chain.push(target_name.to_string());
        let nested = self.run_actions(target, &chained_context, chain);
        chain.pop();

        debug!(
            chain_target = %target_name,
            success = nested.success,
            actions_executed = nested.actions_executed,
            "链接的规则执行完成"
        );
        ActionOutcome::ok(kind, Value::Bool(nested.success))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "处理器发生 panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::condition::Condition;
    use crate::handler::{MockActionHandler, TracingActionHandler};
    use crate::random::SequenceRandom;
    use serde_json::json;
    use std::sync::Arc;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new(
            Arc::new(ManualClock::new(Utc::now())),
            Box::new(SequenceRandom::new([0.5])),
        )
    }

    fn catalogue(rules: Vec<Rule>) -> IndexMap<String, Rule> {
        rules.into_iter().map(|r| (r.name.clone(), r)).collect()
    }

    fn run(
        rules: &IndexMap<String, Rule>,
        handler: &dyn ActionHandler,
        name: &str,
        context: &EvaluationContext,
    ) -> RuleExecutionResult {
        let mut evaluator = evaluator();
        let mut executor = ActionExecutor {
            rules,
            evaluator: &mut evaluator,
            handler,
            max_chain_depth: 8,
            now: Utc::now(),
        };
        executor.run_rule(&rules[name], context)
    }

    #[test]
    fn test_actions_run_in_priority_order() {
        let mut handler = MockActionHandler::new();
        let mut seq = mockall::Sequence::new();
        handler
            .expect_dispatch()
            .withf(|cmd, _, _| matches!(cmd, ActionCommand::AddTag { tag, .. } if tag == "first"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(json!(true)));
        handler
            .expect_dispatch()
            .withf(|cmd, _, _| matches!(cmd, ActionCommand::AddTag { tag, .. } if tag == "second"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(json!(true)));

        let rule = Rule::new("r")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::AddTag).with_param("tag", "second").with_priority(1))
            .with_action(Action::new(ActionKind::AddTag).with_param("tag", "first").with_priority(9));
        let rules = catalogue(vec![rule]);

        let result = run(&rules, &handler, "r", &EvaluationContext::default());
        assert!(result.success);
        assert_eq!(result.actions_executed, 2);
    }

    #[test]
    fn test_abort_stops_lower_priority_actions() {
        let mut handler = MockActionHandler::new();
        handler.expect_dispatch().never();

        let rule = Rule::new("r")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::LogEvent).with_priority(1))
            .with_action(Action::new(ActionKind::Abort).with_priority(5));
        let rules = catalogue(vec![rule]);

        let result = run(&rules, &handler, "r", &EvaluationContext::default());
        assert!(result.success);
        assert_eq!(result.actions_executed, 1);
        assert_eq!(result.action_results[0].action_type, ActionKind::Abort);
        assert_eq!(result.action_results[0].result, Value::Null);
    }

    #[test]
    fn test_guard_condition_skips_action() {
        let rule = Rule::new("r")
            .with_condition(Condition::always())
            .with_action(
                Action::new(ActionKind::LogEvent).with_condition(Condition::equals("level", "error")),
            )
            .with_action(Action::new(ActionKind::Skip));
        let rules = catalogue(vec![rule]);

        let ctx = EvaluationContext::new(json!({"level": "info"}));
        let result = run(&rules, &TracingActionHandler, "r", &ctx);
        assert_eq!(result.actions_executed, 1);
        assert_eq!(result.action_results[0].action_type, ActionKind::Skip);
    }

    struct PanickingHandler;

    impl ActionHandler for PanickingHandler {
        fn dispatch(
            &self,
            _command: &ActionCommand,
            _context: &EvaluationContext,
            _hints: &ExecutionHints,
        ) -> Result<Value, HandlerError> {
            panic!("boom")
        }
    }

    #[test]
    fn test_handler_error_becomes_failure() {
        let mut handler = MockActionHandler::new();
        handler
            .expect_dispatch()
            .times(1)
            .returning(|_, _, _| Err(HandlerError::Failed("storage offline".to_string())));

        let rule = Rule::new("r")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::DeleteMemory))
            .with_action(Action::new(ActionKind::Skip));
        let rules = catalogue(vec![rule]);

        let result = run(&rules, &handler, "r", &EvaluationContext::default());
        assert!(!result.success);
        assert_eq!(result.actions_executed, 2);
        assert!(result.action_results[0].error.as_deref().unwrap().contains("storage offline"));
        assert!(result.action_results[1].success);
    }

    #[test]
    fn test_handler_panic_becomes_failure() {
        let rule = Rule::new("r")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::LogEvent));
        let rules = catalogue(vec![rule]);

        let result = run(&rules, &PanickingHandler, "r", &EvaluationContext::default());
        assert!(!result.success);
        assert!(result.action_results[0].error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_chain_uses_supplied_context() {
        let mut handler = MockActionHandler::new();
        handler
            .expect_dispatch()
            .withf(|_, ctx, _| ctx.get_field("source") == Some(&json!("chained")))
            .times(1)
            .returning(|_, _, _| Ok(json!(true)));

        let first = Rule::new("first").with_condition(Condition::always()).with_action(
            Action::new(ActionKind::ChainPolicy)
                .with_param("policy_name", "second")
                .with_param("context", json!({"source": "chained"})),
        );
        let second = Rule::new("second")
            .with_condition(Condition::never())
            .with_action(Action::new(ActionKind::LogEvent));
        let rules = catalogue(vec![first, second]);

        let result = run(&rules, &handler, "first", &EvaluationContext::default());
        assert!(result.success);
        assert_eq!(result.action_results[0].result, json!(true));
    }

    #[test]
    fn test_chain_to_missing_or_gated_rule_yields_false() {
        let first = Rule::new("first")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "ghost"))
            .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "off"));
        let off = Rule::new("off")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::Skip))
            .disabled();
        let rules = catalogue(vec![first, off]);

        let result = run(&rules, &TracingActionHandler, "first", &EvaluationContext::default());
        assert!(result.success);
        assert_eq!(result.actions_executed, 2);
        for outcome in &result.action_results {
            assert!(outcome.success);
            assert_eq!(outcome.result, json!(false));
            assert!(outcome.error.is_none());
        }
    }

    #[test]
    fn test_chain_reports_nested_failure_as_result() {
        let mut handler = MockActionHandler::new();
        handler
            .expect_dispatch()
            .times(1)
            .returning(|_, _, _| Err(HandlerError::Failed("webhook down".to_string())));

        let first = Rule::new("first")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "second"));
        let second = Rule::new("second")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::ExecuteWebhook).with_param("url", "http://hook"));
        let rules = catalogue(vec![first, second]);

        let result = run(&rules, &handler, "first", &EvaluationContext::default());
        assert!(result.success);
        assert!(result.action_results[0].success);
        assert_eq!(result.action_results[0].result, json!(false));
    }

    #[test]
    fn test_indirect_cycle_refused() {
        let a = Rule::new("a")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "b"));
        let b = Rule::new("b")
            .with_condition(Condition::always())
            .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "a"));
        let rules = catalogue(vec![a, b]);

        // a -> b 成功链接，b -> a 被拒绝，b 失败后 a 只看到 false
        let result = run(&rules, &TracingActionHandler, "a", &EvaluationContext::default());
        assert!(result.success);
        assert_eq!(result.action_results[0].result, json!(false));

        let result = run(&rules, &TracingActionHandler, "b", &EvaluationContext::default());
        assert_eq!(result.action_results[0].result, json!(false));

        let mut evaluator = evaluator();
        let mut executor = ActionExecutor {
            rules: &rules,
            evaluator: &mut evaluator,
            handler: &TracingActionHandler,
            max_chain_depth: 8,
            now: Utc::now(),
        };
        let mut chain = vec!["a".to_string(), "b".to_string()];
        let refused = executor.run_actions(&rules["b"], &EvaluationContext::default(), &mut chain);
        assert!(!refused.success);
        assert!(refused.action_results[0].error.as_deref().unwrap().contains("循环"));
    }

    #[test]
    fn test_chain_depth_limit() {
        let rules: IndexMap<String, Rule> = (0..5)
            .map(|i| {
                let rule = Rule::new(format!("r{}", i))
                    .with_condition(Condition::always())
                    .with_action(
                        Action::new(ActionKind::ChainPolicy)
                            .with_param("policy_name", format!("r{}", i + 1)),
                    );
                (rule.name.clone(), rule)
            })
            .chain(std::iter::once((
                "r5".to_string(),
                Rule::new("r5")
                    .with_condition(Condition::always())
                    .with_action(Action::new(ActionKind::Skip)),
            )))
            .collect();

        let mut evaluator = evaluator();
        let mut shallow = ActionExecutor {
            rules: &rules,
            evaluator: &mut evaluator,
            handler: &TracingActionHandler,
            max_chain_depth: 2,
            now: Utc::now(),
        };
        let limited = shallow.run_rule(&rules["r0"], &EvaluationContext::default());
        assert!(limited.success);
        assert_eq!(limited.action_results[0].result, json!(false));

        let mut deep = ActionExecutor {
            rules: &rules,
            evaluator: &mut evaluator,
            handler: &TracingActionHandler,
            max_chain_depth: 8,
            now: Utc::now(),
        };
        let full = deep.run_rule(&rules["r0"], &EvaluationContext::default());
        assert!(full.success);
        assert_eq!(full.action_results[0].result, json!(true));
    }
}
