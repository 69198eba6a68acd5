//! 配置管理模块
//!
//! 支持多层配置文件加载与环境变量覆盖，提供类型安全的配置访问。

use crate::observability::ObservabilityConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "POLICY";

/// 策略引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// 规则文件路径（.yaml / .yml / .json）
    pub rules_file: PathBuf,
    /// 链式调用最大深度
    pub max_chain_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rules_file: PathBuf::from("config/policies.yaml"),
            max_chain_depth: 8,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineSettings,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置，POLICY_ENV 指定，默认 development）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（POLICY_ 前缀，双下划线分隔层级，如 POLICY_ENGINE__RULES_FILE -> engine.rules_file）
    ///
    /// 配置目录可通过 CONFIG_DIR 环境变量修改。
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("POLICY_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::build(Path::new(&config_dir), &env, service_name, None)
    }

    /// 从指定目录加载配置
    ///
    /// `env_vars` 为 None 时读取进程环境变量，否则只使用给定的键值。
    pub fn build(
        config_dir: &Path,
        env: &str,
        service_name: &str,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env_vars),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
