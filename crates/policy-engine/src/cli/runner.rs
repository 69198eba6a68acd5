//! 命令执行器
//!
//! 负责执行各 CLI 子命令的具体逻辑。输出写入调用方提供的 writer，
//! 日志仍然通过 tracing 输出到 stderr。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use serde_json::{Map, json};
use tracing::{info, warn};

use crate::cli::commands::OutputFormat;
use crate::context::EvaluationContext;
use crate::document::{DocumentFormat, PolicyDocument, load_document, load_into, save_document};
use crate::engine::PolicyEngine;
use crate::rule::{Rule, Scope};
use crate::validator::validate_rule;

/// 命令执行器
///
/// 持有规则文件路径与引擎参数。每个命令从规则文件加载引擎，
/// 修改目录的命令（add / remove）在成功后写回。
pub struct CommandRunner {
    rules_file: PathBuf,
    max_chain_depth: usize,
}

impl CommandRunner {
    /// 创建命令执行器
    pub fn new(rules_file: impl Into<PathBuf>, max_chain_depth: usize) -> Self {
        Self {
            rules_file: rules_file.into(),
            max_chain_depth,
        }
    }

    pub fn rules_file(&self) -> &Path {
        &self.rules_file
    }

    /// 执行 list 命令
    pub fn run_list<W: Write>(
        &self,
        out: &mut W,
        scope: Option<Scope>,
        all: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let engine = self.load_engine()?;
        let rules = engine.list_rules(scope, !all);

        if let Some(format) = format.document_format() {
            let mut listed = Map::new();
            for rule in &rules {
                listed.insert(rule.name.clone(), serde_json::to_value(rule)?);
            }
            let doc = PolicyDocument { rules: listed };
            writeln!(out, "{}", doc.render(format)?)?;
            return Ok(());
        }

        if rules.is_empty() {
            writeln!(out, "没有找到策略规则")?;
            return Ok(());
        }

        writeln!(out, "策略规则 ({}):", rules.len())?;
        writeln!(out, "{}", "-".repeat(60))?;
        for rule in &rules {
            let status = if rule.enabled { "启用" } else { "禁用" };
            writeln!(
                out,
                "[{}] {} (优先级: {}, 范围: {})",
                status, rule.name, rule.priority, rule.scope
            )?;
            if let Some(description) = &rule.description {
                writeln!(out, "    {}", description)?;
            }
            writeln!(
                out,
                "    条件: {}, 动作: {}",
                rule.conditions.len(),
                rule.actions.len()
            )?;
            if let Some(max) = rule.max_executions {
                writeln!(out, "    执行次数: {}/{}", rule.execution_count(), max)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// 执行 add 命令
    ///
    /// 任意条目导入失败时返回错误，规则文件保持不变。
    pub fn run_add<W: Write>(&self, out: &mut W, file: &Path) -> Result<()> {
        let doc = load_document(file)
            .with_context(|| format!("读取策略文档失败: {}", file.display()))?;
        let engine = self.load_engine()?;

        let errors = engine.import_rules(&doc.rules_value());
        if !errors.is_empty() {
            for error in &errors {
                writeln!(out, "  - {}", error)?;
            }
            bail!("{} 条规则导入失败，规则文件未修改", errors.len());
        }

        self.save_engine(&engine)?;
        writeln!(out, "已从 {} 导入策略规则", file.display())?;
        writeln!(out, "    导入 {} 条规则", doc.rules.len())?;
        Ok(())
    }

    /// 执行 remove 命令
    pub fn run_remove<W: Write>(&self, out: &mut W, name: &str) -> Result<()> {
        let engine = self.load_engine()?;
        if !engine.remove_rule(name) {
            bail!("策略规则不存在: {}", name);
        }

        self.save_engine(&engine)?;
        writeln!(out, "策略规则 '{}' 已删除", name)?;
        Ok(())
    }

    /// 执行 test 命令
    ///
    /// 指定 `rule` 时直接执行该规则的动作；否则按正常流程执行所有匹配规则。
    pub fn run_test<W: Write>(
        &self,
        out: &mut W,
        context_file: Option<&Path>,
        rule: Option<&str>,
        output: Option<&Path>,
    ) -> Result<()> {
        let context = match context_file {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("读取上下文文件失败: {}", path.display()))?;
                EvaluationContext::from_json(&text)
                    .with_context(|| format!("解析上下文文件失败: {}", path.display()))?
            }
            None => default_test_context(),
        };

        let engine = self.load_engine()?;
        let results = match rule {
            Some(name) => vec![engine.execute_rule(name, &context)?],
            None => engine.execute_rules(&context, None),
        };

        let successful = results.iter().filter(|r| r.success).count();
        let report = json!({
            "context": context.data(),
            "timestamp": Local::now().to_rfc3339(),
            "results": results,
            "summary": {
                "total_rules": results.len(),
                "successful": successful,
                "failed": results.len() - successful,
            }
        });
        let rendered = serde_json::to_string_pretty(&report)?;

        match output {
            Some(path) => {
                fs::write(path, rendered)
                    .with_context(|| format!("写入测试结果失败: {}", path.display()))?;
                info!(path = %path.display(), "测试结果已保存");
                writeln!(out, "测试结果已保存到 {}", path.display())?;
            }
            None => writeln!(out, "{}", rendered)?,
        }
        Ok(())
    }

    /// 执行 validate 命令
    ///
    /// 逐条输出校验结果，存在无效规则时返回错误。
    pub fn run_validate<W: Write>(&self, out: &mut W, file: &Path) -> Result<()> {
        let doc = load_document(file)
            .with_context(|| format!("读取策略文档失败: {}", file.display()))?;

        writeln!(out, "校验策略文档: {}", file.display())?;
        writeln!(out, "{}", "-".repeat(60))?;

        let mut invalid = 0usize;
        for (name, entry) in &doc.rules {
            let report = match Rule::from_entry(name, entry) {
                Ok(rule) => validate_rule(&rule),
                Err(e) => {
                    invalid += 1;
                    writeln!(out, "[无效] {}", name)?;
                    writeln!(out, "    错误: {}", e)?;
                    continue;
                }
            };

            if report.is_valid() {
                writeln!(out, "[有效] {}", name)?;
            } else {
                invalid += 1;
                writeln!(out, "[无效] {}", name)?;
            }
            for error in &report.errors {
                writeln!(out, "    错误: {}", error)?;
            }
            for warning in &report.warnings {
                writeln!(out, "    警告: {}", warning)?;
            }
        }

        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(
            out,
            "共 {} 条规则，{} 条有效",
            doc.rules.len(),
            doc.rules.len() - invalid
        )?;

        if invalid > 0 {
            bail!("{} 条规则校验失败", invalid);
        }
        Ok(())
    }

    /// 执行 export 命令
    pub fn run_export<W: Write>(&self, out: &mut W, format: DocumentFormat) -> Result<()> {
        let engine = self.load_engine()?;
        let doc = PolicyDocument::from_engine(&engine)?;
        writeln!(out, "{}", doc.render(format)?)?;
        Ok(())
    }

    // ========================================================================
    // 辅助方法
    // ========================================================================

    /// 从规则文件构建引擎，文件不存在时返回空引擎
    fn load_engine(&self) -> Result<PolicyEngine> {
        let engine = PolicyEngine::builder()
            .max_chain_depth(self.max_chain_depth)
            .build();

        if self.rules_file.exists() {
            let errors = load_into(&engine, &self.rules_file)
                .with_context(|| format!("加载规则文件失败: {}", self.rules_file.display()))?;
            for error in errors {
                warn!("{}", error);
            }
        } else {
            info!(path = %self.rules_file.display(), "规则文件不存在，使用空规则目录");
        }

        Ok(engine)
    }

    fn save_engine(&self, engine: &PolicyEngine) -> Result<()> {
        save_document(&self.rules_file, engine)
            .with_context(|| format!("保存规则文件失败: {}", self.rules_file.display()))
    }
}

/// 内置测试上下文
fn default_test_context() -> EvaluationContext {
    EvaluationContext::new(json!({
        "agent_name": "test_agent",
        "operation": "test_operation",
        "success": true,
        "timestamp": Local::now().to_rfc3339(),
        "environment": "testing",
    }))
}

// ============================================================================
// 单元测试
// ============================================================================
