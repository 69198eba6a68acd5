//! 策略引擎集成测试
//!
//! 覆盖从规则注册、门控、条件评估到动作执行与导出导入的完整流程。

use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use policy_engine::{
    Action, ActionCommand, ActionHandler, ActionKind, Condition, ConditionEvaluator,
    EvaluationContext, ExecutionHints, HandlerError, ManualClock, PolicyEngine, PolicyError, Rule,
    Scope, SequenceRandom, load_into,
};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

/// 记录每次分发的命令种类
#[derive(Default)]
struct RecordingHandler {
    dispatched: Mutex<Vec<ActionKind>>,
}

impl RecordingHandler {
    fn kinds(&self) -> Vec<ActionKind> {
        self.dispatched.lock().clone()
    }
}

impl ActionHandler for RecordingHandler {
    fn dispatch(
        &self,
        command: &ActionCommand,
        _context: &EvaluationContext,
        _hints: &ExecutionHints,
    ) -> Result<Value, HandlerError> {
        self.dispatched.lock().push(command.kind());
        Ok(Value::Bool(true))
    }
}

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ))
}

fn engine_with(clock: Arc<ManualClock>, handler: Arc<RecordingHandler>) -> PolicyEngine {
    PolicyEngine::builder()
        .clock(clock)
        .handler(handler)
        .random(SequenceRandom::new([0.5]))
        .build()
}

fn log_action(message: &str) -> Action {
    Action::new(ActionKind::LogEvent).with_param("message", message)
}

/// 创建测试上下文：模拟一次代理任务完成事件
fn task_context() -> EvaluationContext {
    EvaluationContext::new(json!({
        "agent_name": "qa_agent",
        "operation": "run_tests",
        "success": true,
        "duration_ms": "1250",
        "result": {
            "passed": 42,
            "failed": 0,
            "tags": ["nightly", "regression"]
        },
        "environment": "testing"
    }))
}

// ============================================================================
// 条件评估
// ============================================================================

fn deterministic_condition() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::always()),
        Just(Condition::never()),
        (-50i64..50).prop_map(|n| Condition::equals("x", n)),
        (-50i64..50).prop_map(|n| Condition::not_equals("x", n)),
        (-50.0f64..50.0).prop_map(|t| Condition::greater_than("x", t)),
        (-50.0f64..50.0).prop_map(|t| Condition::less_than("x", t)),
        (-50.0f64..0.0, 0.0f64..50.0).prop_map(|(lo, hi)| Condition::between("x", lo, hi)),
        "[a-c]{1,2}".prop_map(|needle| Condition::contains("s", needle)),
        "[a-c]{1,2}".prop_map(|needle| Condition::not_contains("s", needle)),
        Just(Condition::contains("missing", "a")),
        Just(Condition::not_contains("missing", "a")),
    ]
}

proptest! {
    #[test]
    fn test_negation_inverts_result(
        condition in deterministic_condition(),
        x in -60i64..60,
        s in "[a-d]{0,6}",
    ) {
        let context = EvaluationContext::new(json!({"x": x, "s": s}));
        let mut evaluator = ConditionEvaluator::default();

        let plain = evaluator.evaluate(&condition, &context);
        let negated = evaluator.evaluate(&condition.clone().negated(), &context);
        prop_assert_eq!(negated, !plain);
    }

    #[test]
    fn test_negation_inverts_composites(
        first in deterministic_condition(),
        second in deterministic_condition(),
        x in -60i64..60,
    ) {
        let context = EvaluationContext::new(json!({"x": x, "s": "abc"}));
        let mut evaluator = ConditionEvaluator::default();

        for composite in [
            Condition::all(vec![first.clone(), second.clone()]).unwrap(),
            Condition::any(vec![first.clone(), second.clone()]).unwrap(),
        ] {
            let plain = evaluator.evaluate(&composite, &context);
            prop_assert_eq!(evaluator.evaluate(&composite.negated(), &context), !plain);
        }
    }
}

#[test]
fn test_time_range_across_midnight() {
    let clock = manual_clock();
    let mut evaluator =
        ConditionEvaluator::new(clock.clone(), Box::new(SequenceRandom::new([0.0])));
    let night = Condition::time_range("22:00", "06:00").unwrap();
    let context = EvaluationContext::default();

    clock.set_time_of_day("23:30");
    assert!(evaluator.evaluate(&night, &context));
    clock.set_time_of_day("02:00");
    assert!(evaluator.evaluate(&night, &context));
    clock.set_time_of_day("12:00");
    assert!(!evaluator.evaluate(&night, &context));
}

#[test]
fn test_rate_limit_window() {
    let clock = manual_clock();
    let mut evaluator =
        ConditionEvaluator::new(clock.clone(), Box::new(SequenceRandom::new([0.0])));
    let limit = Condition::rate_limit(Some("agent_name"), 3, 60).unwrap();
    let context = task_context();

    for _ in 0..3 {
        assert!(evaluator.evaluate(&limit, &context));
    }
    assert!(!evaluator.evaluate(&limit, &context));

    clock.advance(Duration::seconds(30));
    assert!(!evaluator.evaluate(&limit, &context));

    clock.advance(Duration::seconds(30));
    assert!(evaluator.evaluate(&limit, &context));
}

#[test]
fn test_between_coerces_text() {
    let mut evaluator = ConditionEvaluator::default();
    let range = Condition::between("value", 1.0, 10.0);

    let numeric_text = EvaluationContext::new(json!({"value": "5"}));
    assert!(evaluator.evaluate(&range, &numeric_text));

    let garbage = EvaluationContext::new(json!({"value": "abc"}));
    assert!(!evaluator.evaluate(&range, &garbage));
}

#[test]
fn test_composite_pair() {
    let mut evaluator = ConditionEvaluator::default();
    let context = EvaluationContext::default();
    let pair = || vec![Condition::always(), Condition::never()];

    assert!(!evaluator.evaluate(&Condition::all(pair()).unwrap(), &context));
    assert!(evaluator.evaluate(&Condition::any(pair()).unwrap(), &context));
}

// ============================================================================
// 规则门控与执行
// ============================================================================

#[test]
fn test_max_executions_gates_second_pass() {
    let handler = Arc::new(RecordingHandler::default());
    let engine = engine_with(manual_clock(), handler.clone());
    engine
        .add_rule(
            Rule::new("once")
                .with_condition(Condition::equals("agent_name", "qa_agent"))
                .with_action(log_action("first run"))
                .with_max_executions(1),
        )
        .unwrap();

    let context = task_context();
    let first = engine.execute_rules(&context, None);
    assert_eq!(first.len(), 1);
    assert!(first[0].success);

    let second = engine.execute_rules(&context, None);
    assert!(second.is_empty());
    assert_eq!(handler.kinds(), vec![ActionKind::LogEvent]);
    assert_eq!(engine.get_rule("once").unwrap().execution_count(), 1);
    assert!(!engine.can_execute("once").unwrap());
}

#[test]
fn test_cooldown_gates_until_elapsed() {
    let clock = manual_clock();
    let handler = Arc::new(RecordingHandler::default());
    let engine = engine_with(clock.clone(), handler.clone());
    engine
        .add_rule(
            Rule::new("cooled")
                .with_condition(Condition::always())
                .with_action(log_action("tick"))
                .with_cooldown(std::time::Duration::from_secs(300)),
        )
        .unwrap();

    let context = task_context();
    assert_eq!(engine.execute_rules(&context, None).len(), 1);

    clock.advance(Duration::seconds(299));
    assert!(engine.execute_rules(&context, None).is_empty());

    clock.advance(Duration::seconds(1));
    assert_eq!(engine.execute_rules(&context, None).len(), 1);
    assert_eq!(handler.kinds().len(), 2);
}

#[test]
fn test_abort_blocks_lower_priority_action() {
    let handler = Arc::new(RecordingHandler::default());
    let engine = engine_with(manual_clock(), handler.clone());
    engine
        .add_rule(
            Rule::new("guarded")
                .with_condition(Condition::always())
                .with_action(log_action("never runs").with_priority(1))
                .with_action(Action::new(ActionKind::Abort).with_priority(5)),
        )
        .unwrap();

    let results = engine.execute_rules(&task_context(), None);
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.actions_executed, 1);
    assert_eq!(result.action_results.len(), 1);
    assert_eq!(result.action_results[0].action_type, ActionKind::Abort);
    assert!(handler.kinds().is_empty());
}

#[test]
fn test_self_chain_rejected() {
    let engine = PolicyEngine::new();
    let rule = Rule::new("loop")
        .with_condition(Condition::always())
        .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "loop"));

    let err = engine.add_rule(rule).unwrap_err();
    assert!(matches!(err, PolicyError::InvalidRule { ref name, .. } if name == "loop"));
    assert!(engine.get_rule("loop").is_none());
    assert!(engine.is_empty());
}

#[test]
fn test_chain_cycle_is_refused_at_runtime() {
    let handler = Arc::new(RecordingHandler::default());
    let engine = engine_with(manual_clock(), handler.clone());
    engine
        .add_rule(
            Rule::new("ping")
                .with_priority(10)
                .with_condition(Condition::always())
                .with_action(Action::new(ActionKind::ChainPolicy).with_param("policy_name", "pong")),
        )
        .unwrap();
    engine
        .add_rule(
            Rule::new("pong")
                .with_condition(Condition::never())
                .with_action(log_action("pong"))
                .with_action(
                    Action::new(ActionKind::ChainPolicy)
                        .with_param("policy_name", "ping")
                        .with_priority(0),
                ),
        )
        .unwrap();

    let results = engine.execute_rules(&task_context(), None);
    assert_eq!(results.len(), 1);
    let ping = &results[0];
    assert_eq!(ping.rule_name, "ping");
    // pong 的日志动作正常执行，回到 ping 的链接被拒绝，ping 只看到 false
    assert_eq!(handler.kinds(), vec![ActionKind::LogEvent]);
    assert!(ping.success);
    assert!(ping.action_results[0].success);
    assert_eq!(ping.action_results[0].result, json!(false));
}

#[test]
fn test_chain_to_disabled_rule_counts_as_success() {
    let handler = Arc::new(RecordingHandler::default());
    let engine = engine_with(manual_clock(), handler.clone());
    engine
        .add_rule(
            Rule::new("dispatcher")
                .with_condition(Condition::always())
                .with_action(
                    Action::new(ActionKind::ChainPolicy).with_param("policy_name", "dormant"),
                ),
        )
        .unwrap();
    engine
        .add_rule(
            Rule::new("dormant")
                .with_condition(Condition::always())
                .with_action(log_action("dormant"))
                .disabled(),
        )
        .unwrap();

    let results = engine.execute_rules(&task_context(), None);
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].action_results[0].result, json!(false));
    assert!(handler.kinds().is_empty());

    let stats = engine.execution_stats();
    assert_eq!(stats["dispatcher"].executions, 1);
    assert_eq!(stats["dispatcher"].successes, 1);
    assert_eq!(stats["dispatcher"].failures, 0);
}

#[test]
fn test_concurrent_callers_respect_max_executions() {
    let handler = Arc::new(RecordingHandler::default());
    let engine = Arc::new(engine_with(manual_clock(), handler.clone()));
    engine
        .add_rule(
            Rule::new("once")
                .with_condition(Condition::always())
                .with_action(log_action("only once"))
                .with_max_executions(1),
        )
        .unwrap();

    let fired: usize = std::thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                s.spawn(move || engine.execute_rules(&task_context(), None).len())
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).sum()
    });

    assert_eq!(fired, 1);
    assert_eq!(engine.get_rule("once").unwrap().execution_count(), 1);
    assert_eq!(engine.execution_stats()["once"].executions, 1);
    assert_eq!(handler.kinds(), vec![ActionKind::LogEvent]);
}

#[test]
fn test_list_rules_scope_and_order() {
    let engine = PolicyEngine::new();
    let rule = |name: &str, priority: u32, scope: Scope| {
        Rule::new(name)
            .with_priority(priority)
            .with_scope(scope)
            .with_condition(Condition::always())
            .with_action(log_action(name))
    };

    engine.add_rule(rule("agent_low", 1, Scope::Agent)).unwrap();
    engine.add_rule(rule("agent_high_a", 5, Scope::Agent)).unwrap();
    engine.add_rule(rule("global_high", 9, Scope::Global)).unwrap();
    engine
        .add_rule(rule("agent_disabled", 7, Scope::Agent).disabled())
        .unwrap();
    engine.add_rule(rule("agent_high_b", 5, Scope::Agent)).unwrap();

    let names: Vec<String> = engine
        .list_rules(Some(Scope::Agent), true)
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["agent_high_a", "agent_high_b", "agent_low"]);

    let all = engine.list_rules(Some(Scope::Agent), false);
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].name, "agent_disabled");
}

// ============================================================================
// 导出与导入
// ============================================================================

#[test]
fn test_export_import_round_trip() {
    let source = PolicyEngine::new();
    source
        .add_rule(
            Rule::new("memory_cleanup")
                .with_description("归档低质量记忆")
                .with_priority(3)
                .with_scope(Scope::Workflow)
                .with_condition(Condition::less_than("quality", 0.3))
                .with_condition(Condition::matches_regex("category", "^tmp_").unwrap())
                .with_action(
                    Action::new(ActionKind::ArchiveMemory)
                        .with_param("memory_id", "m-1")
                        .with_param("archive_location", "cold")
                        .with_condition(Condition::time_range("01:00", "05:00").unwrap())
                        .with_timeout(30.0),
                )
                .with_max_executions(10)
                .with_cooldown(std::time::Duration::from_secs(3600))
                .with_tag("maintenance"),
        )
        .unwrap();
    source
        .add_rule(
            Rule::new("error_alert")
                .with_condition(
                    Condition::any(vec![
                        Condition::equals("success", false),
                        Condition::in_list("level", vec![json!("error"), json!("fatal")]).unwrap(),
                    ])
                    .unwrap(),
                )
                .with_condition(Condition::rate_limit(Some("agent_name"), 5, 60).unwrap().negated())
                .with_action(
                    Action::new(ActionKind::TriggerAlert)
                        .with_param("message", "agent failed")
                        .with_param("alert_type", "error"),
                ),
        )
        .unwrap();
    source
        .add_rule(
            Rule::new("heartbeat")
                .with_condition(Condition::always())
                .with_action(log_action("alive")),
        )
        .unwrap();
    source.execute_rules(&task_context(), None);
    assert_eq!(source.get_rule("heartbeat").unwrap().execution_count(), 1);

    let exported = source.export_rules().unwrap();
    let target = PolicyEngine::new();
    assert!(target.import_rules(&exported).is_empty());

    assert_eq!(target.export_rules().unwrap(), exported);
    let names: Vec<String> = target
        .list_rules(None, false)
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["memory_cleanup", "error_alert", "heartbeat"]);
    for rule in target.list_rules(None, false) {
        assert_eq!(rule.execution_count(), 0);
    }
}

#[test]
fn test_import_is_best_effort() {
    let engine = PolicyEngine::new();
    let errors = engine.import_rules(&json!({
        "valid": {
            "conditions": [{"type": "always"}],
            "actions": [{"type": "log_event", "parameters": {"message": "ok"}}]
        },
        "no_actions": {
            "conditions": [{"type": "always"}],
            "actions": []
        },
        "bad_condition": {
            "conditions": [{"type": "time_range", "start_time": "25:00", "end_time": "06:00"}],
            "actions": [{"type": "skip"}]
        }
    }));

    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("no_actions"));
    assert!(errors[1].contains("bad_condition"));
    assert_eq!(engine.len(), 1);
    assert!(engine.get_rule("valid").is_some());
}

#[test]
fn test_sample_policies_are_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/policies.yaml");
    let engine = PolicyEngine::new();
    let errors = load_into(&engine, &path).unwrap();
    assert!(errors.is_empty(), "示例规则导入失败: {:?}", errors);

    let alert = engine.get_rule("agent_failure_alert").unwrap();
    assert_eq!(alert.scope, Scope::Agent);
    assert_eq!(alert.cooldown_period, Some(std::time::Duration::from_secs(60)));
    assert_eq!(engine.get_rule("nightly_cleanup").unwrap().max_executions, Some(100));
}
