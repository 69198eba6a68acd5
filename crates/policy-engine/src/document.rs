//! 策略文档读写
//!
//! 文档结构为 `{ rules: { <name>: {...} } }`，按扩展名选择 YAML（.yaml/.yml）或 JSON。

use crate::engine::PolicyEngine;
use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{info, instrument, warn};

/// 文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// 根据扩展名判断格式
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(PolicyError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// 策略文档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub rules: Map<String, Value>,
}

impl PolicyDocument {
    pub fn from_engine(engine: &PolicyEngine) -> Result<Self> {
        let rules = match engine.export_rules()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self { rules })
    }

    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc = match format {
            DocumentFormat::Json => serde_json::from_str(text)?,
            DocumentFormat::Yaml => {
                // 经由 JSON 值中转，保证两种格式得到相同的数据模型
                let value: Value = serde_yaml::from_str(text)?;
                if value.is_null() {
                    Self::default()
                } else {
                    serde_json::from_value(value)?
                }
            }
        };
        Ok(doc)
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String> {
        Ok(match format {
            DocumentFormat::Json => serde_json::to_string_pretty(self)?,
            DocumentFormat::Yaml => serde_yaml::to_string(self)?,
        })
    }

    pub fn rules_value(&self) -> Value {
        Value::Object(self.rules.clone())
    }
}

/// 读取策略文档
#[instrument]
pub fn load_document(path: &Path) -> Result<PolicyDocument> {
    let format = DocumentFormat::from_path(path)?;
    let text = fs::read_to_string(path)?;
    PolicyDocument::parse(&text, format)
}

/// 把引擎中的规则写入策略文档
#[instrument(skip(engine))]
pub fn save_document(path: &Path, engine: &PolicyEngine) -> Result<()> {
    let format = DocumentFormat::from_path(path)?;
    let doc = PolicyDocument::from_engine(engine)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, doc.render(format)?)?;
    info!("策略配置已保存: {} ({} 条规则)", path.display(), doc.rules.len());
    Ok(())
}

/// 读取文档并导入引擎，返回逐条导入错误
#[instrument(skip(engine))]
pub fn load_into(engine: &PolicyEngine, path: &Path) -> Result<Vec<String>> {
    let doc = load_document(path)?;
    let errors = engine.import_rules(&doc.rules_value());
    if !errors.is_empty() {
        warn!("导入规则时出现错误: {}", errors.join(", "));
    }
    info!("策略配置已加载: {}", path.display());
    Ok(errors)
}
