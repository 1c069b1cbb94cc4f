//! 应用配置：从 config/default.toml、可选的显式文件与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `REPROMPT__*` 覆盖（双下划线表示嵌套，如 `REPROMPT__ENGINE__MAX_STEPS=5`）。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::PromptError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择；只有 mock 是内置的，其它 provider 必须给出 model
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_provider() -> String {
    "mock".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
        }
    }
}

/// [engine] 段：step 上限与工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_steps() -> usize {
    20
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// 运行前的快速校验：配置错误在任何 step 之前失败
    pub fn validate(&self) -> Result<(), PromptError> {
        if self.llm.provider != "mock" && self.llm.model.as_deref().unwrap_or("").is_empty() {
            return Err(PromptError::Config(format!(
                "llm.model is required for provider '{}'",
                self.llm.provider
            )));
        }
        if self.engine.max_steps == 0 {
            return Err(PromptError::Config("engine.max_steps must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// 加载配置，环境变量 REPROMPT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 REPROMPT__*
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, PromptError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "default"] {
        if Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(PathBuf::from(path)).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("REPROMPT")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| PromptError::Config(e.to_string()))
}
