//! 策略规则引擎命令行入口
//!
//! 加载配置、初始化日志后执行子命令。

use std::io;

use anyhow::Result;
use clap::Parser;
use policy_engine::cli::{Cli, CommandRunner, Commands};
use policy_shared::config::AppConfig;
use policy_shared::observability;

const SERVICE_NAME: &str = "policy-engine";

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 统一加载配置：config/default.toml -> config/{env}.toml -> config/policy-engine.toml -> POLICY_*
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 命令行指定的日志级别优先于配置
    let mut obs_config = config.observability.clone();
    if let Some(level) = &cli.log_level {
        obs_config = obs_config.with_log_level(level);
    }
    observability::init(SERVICE_NAME, &obs_config)?;

    let rules_file = cli.rules.unwrap_or(config.engine.rules_file);
    let runner = CommandRunner::new(rules_file, config.engine.max_chain_depth);
    let mut out = io::stdout().lock();

    match cli.command {
        Commands::List { scope, all, format } => {
            runner.run_list(&mut out, scope, all, format)?;
        }
        Commands::Add { file } => {
            runner.run_add(&mut out, &file)?;
        }
        Commands::Remove { name } => {
            runner.run_remove(&mut out, &name)?;
        }
        Commands::Test {
            context,
            rule,
            output,
        } => {
            runner.run_test(
                &mut out,
                context.as_deref(),
                rule.as_deref(),
                output.as_deref(),
            )?;
        }
        Commands::Validate { file } => {
            runner.run_validate(&mut out, &file)?;
        }
        Commands::Export { format } => {
            runner.run_export(&mut out, format.into())?;
        }
    }

    Ok(())
}
