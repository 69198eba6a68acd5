//! 策略引擎
//!
//! 持有规则目录、执行统计与条件评估器。所有状态放在同一把互斥锁之后，
//! 一次 `execute_rules` 调用（包括链式调用）在持锁期间执行完毕。

use crate::clock::{Clock, SystemClock};
use crate::context::EvaluationContext;
use crate::error::{PolicyError, Result};
use crate::evaluator::ConditionEvaluator;
use crate::executor::{ActionExecutor, RuleExecutionResult};
use crate::handler::{ActionHandler, TracingActionHandler};
use crate::random::{RandomSource, StdRandom};
use crate::rule::{Combinator, Rule, Scope};
use crate::validator::validate_rule;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 默认的链式调用最大深度
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 8;

/// 单条规则的累计执行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
}

struct EngineState {
    rules: IndexMap<String, Rule>,
    stats: IndexMap<String, ExecutionStats>,
    evaluator: ConditionEvaluator,
}

/// 策略引擎构建器
pub struct PolicyEngineBuilder {
    clock: Arc<dyn Clock>,
    random: Box<dyn RandomSource>,
    handler: Arc<dyn ActionHandler>,
    max_chain_depth: usize,
}

impl Default for PolicyEngineBuilder {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            random: Box::new(StdRandom::from_entropy()),
            handler: Arc::new(TracingActionHandler),
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl PolicyEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    pub fn build(self) -> PolicyEngine {
        PolicyEngine {
            state: Mutex::new(EngineState {
                rules: IndexMap::new(),
                stats: IndexMap::new(),
                evaluator: ConditionEvaluator::new(self.clock.clone(), self.random),
            }),
            clock: self.clock,
            handler: self.handler,
            max_chain_depth: self.max_chain_depth,
        }
    }
}

/// 策略引擎
pub struct PolicyEngine {
    state: Mutex<EngineState>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn ActionHandler>,
    max_chain_depth: usize,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> PolicyEngineBuilder {
        PolicyEngineBuilder::default()
    }

    /// 规则数量
    pub fn len(&self) -> usize {
        self.state.lock().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().rules.is_empty()
    }

    /// 添加规则，同名规则会被覆盖（保留原有位置）
    ///
    /// 校验失败时返回包含全部错误的 [`PolicyError::InvalidRule`]，目录保持不变。
    #[instrument(skip(self, rule), fields(rule_name = %rule.name))]
    pub fn add_rule(&self, rule: Rule) -> Result<()> {
        let mut state = self.state.lock();
        Self::insert_validated(&mut state, rule)
    }

    fn insert_validated(state: &mut EngineState, rule: Rule) -> Result<()> {
        let report = validate_rule(&rule);
        if !report.is_valid() {
            return Err(PolicyError::InvalidRule {
                name: rule.name,
                errors: report.errors,
            });
        }
        for warning in &report.warnings {
            warn!(rule_name = %rule.name, "规则校验警告: {}", warning);
        }

        let name = rule.name.clone();
        let replaced = state.rules.insert(name.clone(), rule).is_some();
        if replaced {
            info!("策略规则已覆盖: {}", name);
        } else {
            info!("策略规则已添加: {}", name);
        }
        Ok(())
    }

    /// 删除规则
    #[instrument(skip(self))]
    pub fn remove_rule(&self, name: &str) -> bool {
        let removed = self.state.lock().rules.shift_remove(name).is_some();
        if removed {
            info!("策略规则已删除: {}", name);
        } else {
            warn!("删除不存在的策略规则: {}", name);
        }
        removed
    }

    /// 获取规则
    pub fn get_rule(&self, name: &str) -> Option<Rule> {
        self.state.lock().rules.get(name).cloned()
    }

    /// 按范围与启用状态筛选规则，按优先级降序（同优先级保持插入顺序）
    pub fn list_rules(&self, scope: Option<Scope>, enabled_only: bool) -> Vec<Rule> {
        let state = self.state.lock();
        filter_sorted(&state.rules, scope, enabled_only)
            .into_iter()
            .cloned()
            .collect()
    }

    /// 检查规则当前是否可执行
    pub fn can_execute(&self, name: &str) -> Result<bool> {
        let now = self.clock.now();
        self.state
            .lock()
            .rules
            .get(name)
            .map(|rule| rule.can_execute(now))
            .ok_or_else(|| PolicyError::RuleNotFound(name.to_string()))
    }

    /// 评估规则，返回满足条件的规则（按优先级排序）
    pub fn evaluate_rules(&self, context: &EvaluationContext, scope: Option<Scope>) -> Vec<Rule> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let names = matching_names(state, context, scope, self.clock.now());
        names
            .iter()
            .filter_map(|name| state.rules.get(name).cloned())
            .collect()
    }

    /// 执行所有满足条件的规则
    ///
    /// 单条规则失败不会影响其他规则；每条被执行的规则都会记录执行次数与时间。
    #[instrument(skip(self, context))]
    pub fn execute_rules(
        &self,
        context: &EvaluationContext,
        scope: Option<Scope>,
    ) -> Vec<RuleExecutionResult> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let matched = matching_names(state, context, scope, self.clock.now());
        debug!(matched = matched.len(), "规则匹配完成");

        let mut results = Vec::with_capacity(matched.len());
        for name in matched {
            let Some(rule) = state.rules.get(&name) else {
                continue;
            };

            let now = self.clock.now();
            let result = ActionExecutor {
                rules: &state.rules,
                evaluator: &mut state.evaluator,
                handler: self.handler.as_ref(),
                max_chain_depth: self.max_chain_depth,
                now,
            }
            .run_rule(rule, context);

            if let Some(rule) = state.rules.get_mut(&name) {
                rule.record_execution(self.clock.now());
            }

            let stats = state.stats.entry(name.clone()).or_default();
            stats.executions += 1;
            let outcome = if result.success {
                stats.successes += 1;
                "success"
            } else {
                stats.failures += 1;
                "failure"
            };
            metrics::counter!("policy_rule_executions_total", "rule" => name.clone(), "outcome" => outcome)
                .increment(1);
            info!(
                rule_name = %name,
                success = result.success,
                actions = result.actions_executed,
                "策略规则已执行"
            );

            results.push(result);
        }

        results
    }

    /// 直接执行指定规则的动作，不做门控与条件判断，也不记录执行
    ///
    /// 用于调试单条规则。
    #[instrument(skip(self, context))]
    pub fn execute_rule(&self, name: &str, context: &EvaluationContext) -> Result<RuleExecutionResult> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let rule = state
            .rules
            .get(name)
            .ok_or_else(|| PolicyError::RuleNotFound(name.to_string()))?;

        Ok(ActionExecutor {
            rules: &state.rules,
            evaluator: &mut state.evaluator,
            handler: self.handler.as_ref(),
            max_chain_depth: self.max_chain_depth,
            now: self.clock.now(),
        }
        .run_rule(rule, context))
    }

    /// 获取执行统计
    pub fn execution_stats(&self) -> IndexMap<String, ExecutionStats> {
        self.state.lock().stats.clone()
    }

    /// 清空执行统计
    pub fn reset_execution_stats(&self) {
        self.state.lock().stats.clear();
        info!("执行统计已重置");
    }

    /// 清空限流历史
    pub fn clear_rate_limits(&self) {
        self.state.lock().evaluator.clear_rate_limits();
    }

    /// 导出规则目录：按插入顺序的 name -> rule 对象
    pub fn export_rules(&self) -> Result<Value> {
        let state = self.state.lock();
        let mut exported = Map::new();
        for (name, rule) in &state.rules {
            exported.insert(name.clone(), serde_json::to_value(rule)?);
        }
        Ok(Value::Object(exported))
    }

    /// 导入规则目录
    ///
    /// 逐条导入，失败的条目收集为错误信息，不影响其他条目。
    #[instrument(skip(self, data))]
    pub fn import_rules(&self, data: &Value) -> Vec<String> {
        let Some(entries) = data.as_object() else {
            return vec!["导入数据必须是 name -> rule 对象".to_string()];
        };

        let mut state = self.state.lock();
        let mut errors = Vec::new();
        let mut imported = 0usize;

        for (name, entry) in entries {
            let outcome = Rule::from_entry(name, entry)
                .map_err(PolicyError::from)
                .and_then(|rule| Self::insert_validated(&mut state, rule));
            match outcome {
                Ok(()) => imported += 1,
                Err(e) => errors.push(format!("导入规则 '{}' 失败: {}", name, e)),
            }
        }

        if errors.is_empty() {
            info!(imported, "规则导入完成");
        } else {
            warn!(imported, failed = errors.len(), "规则导入部分失败");
        }
        errors
    }
}

fn filter_sorted(
    rules: &IndexMap<String, Rule>,
    scope: Option<Scope>,
    enabled_only: bool,
) -> Vec<&Rule> {
    let mut selected: Vec<&Rule> = rules
        .values()
        .filter(|rule| !enabled_only || rule.enabled)
        .filter(|rule| scope.is_none_or(|s| rule.scope == s))
        .collect();
    selected.sort_by(|a, b| b.priority.cmp(&a.priority));
    selected
}

fn rule_matches(
    evaluator: &mut ConditionEvaluator,
    rule: &Rule,
    context: &EvaluationContext,
) -> bool {
    if rule.conditions.is_empty() {
        return true;
    }
    match rule.combinator {
        Combinator::And => rule.conditions.iter().all(|c| evaluator.evaluate(c, context)),
        Combinator::Or => rule.conditions.iter().any(|c| evaluator.evaluate(c, context)),
    }
}

fn matching_names(
    state: &mut EngineState,
    context: &EvaluationContext,
    scope: Option<Scope>,
    now: DateTime<Utc>,
) -> Vec<String> {
    filter_sorted(&state.rules, scope, true)
        .into_iter()
        .filter(|rule| rule.can_execute(now))
        .filter(|rule| rule_matches(&mut state.evaluator, rule, context))
        .map(|rule| rule.name.clone())
        .collect()
}
