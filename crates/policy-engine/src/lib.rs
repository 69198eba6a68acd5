//! 策略规则引擎
//!
//! 根据运行时事件决定何时触发自动化动作：
//! - 类型化的条件表达式（含复合逻辑、时间段、滑动窗口限流）
//! - 按优先级排序的规则匹配与动作执行
//! - 执行次数上限、冷却期与链式调用保护
//! - 规则目录的导出与导入（YAML / JSON）

pub mod action;
pub mod cli;
pub mod clock;
pub mod condition;
pub mod context;
pub mod document;
pub mod engine;
pub mod error;
pub mod evaluator;
mod executor;
pub mod handler;
pub mod random;
pub mod rule;
pub mod validator;

pub use action::{Action, ActionKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{Condition, ConditionKind, ConditionRecord, Predicate};
pub use context::EvaluationContext;
pub use document::{DocumentFormat, PolicyDocument, load_document, load_into, save_document};
pub use engine::{DEFAULT_MAX_CHAIN_DEPTH, ExecutionStats, PolicyEngine, PolicyEngineBuilder};
pub use error::{PolicyError, Result};
pub use evaluator::ConditionEvaluator;
pub use executor::{ActionOutcome, RuleExecutionResult};
pub use handler::{ActionCommand, ActionHandler, ExecutionHints, HandlerError, TracingActionHandler};
pub use random::{RandomSource, SequenceRandom, StdRandom};
pub use rule::{Combinator, Rule, Scope};
pub use validator::{ValidationReport, validate_rule};
