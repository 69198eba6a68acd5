//! 评估上下文
//!
//! 触发事件携带的嵌套数据，条件通过点号路径（如 "task.result.status"）读取字段。

use serde::{Deserialize, Serialize};
use serde_json::Value;

static NULL: Value = Value::Null;

/// 评估上下文 - 每个触发事件提供给策略引擎的数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext {
    data: Value,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 从 JSON 字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self { data })
    }

    /// 获取字段值（支持点号分隔的路径，如 "agent.name" 或 "errors.0.code"）
    ///
    /// 任一中间节点不存在时返回 None，而不是报错。
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }

        let mut current = &self.data;
        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// 解析字段值，缺失的路径统一视为 null
    pub fn resolve(&self, path: Option<&str>) -> &Value {
        path.and_then(|p| self.get_field(p)).unwrap_or(&NULL)
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl From<Value> for EvaluationContext {
    fn from(data: Value) -> Self {
        Self::new(data)
    }
}
