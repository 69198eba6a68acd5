//! 指标描述
//!
//! 策略引擎通过 `metrics` 门面记录计数器，这里集中注册它们的说明。

/// 规则执行次数（标签：rule, outcome）
pub const RULE_EXECUTIONS_TOTAL: &str = "policy_rule_executions_total";
/// 条件评估故障次数（标签：kind）
pub const CONDITION_FAULTS_TOTAL: &str = "policy_condition_faults_total";

/// 注册指标描述
pub fn describe_metrics() {
    metrics::describe_counter!(
        RULE_EXECUTIONS_TOTAL,
        "Total number of policy rule executions by outcome"
    );
    metrics::describe_counter!(
        CONDITION_FAULTS_TOTAL,
        "Total number of condition evaluations that failed and were treated as false"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_recorder() {
        // 未安装 recorder 时描述是空操作
        describe_metrics();
    }
}
