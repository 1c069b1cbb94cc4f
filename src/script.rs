//! Prompt 脚本：CLI `run <file>` 读取的 TOML 文件
//!
//! ```toml
//! prompt = "Summarise the notes"
//! tools = ["echo"]
//!
//! [system]
//! role = "You are a careful assistant."
//!
//! [variables]
//! name = "Alice"
//!
//! [data]
//! notes = { topic = "bees", count = 3 }
//! ```
//!
//! 各表保持文件中的声明顺序（toml preserve_order + IndexMap）。

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{describe_fn, DescribeFn, PromptError};
use crate::tools::{EchoTool, ToolDefinition};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptScript {
    /// 入口用户消息
    pub prompt: String,
    #[serde(default)]
    pub system: IndexMap<String, String>,
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    #[serde(default)]
    pub data: IndexMap<String, Value>,
    /// 内置工具名
    #[serde(default)]
    pub tools: Vec<String>,
}

/// 内置工具
pub fn builtin_tool(name: &str) -> Option<ToolDefinition> {
    match name {
        "echo" => Some(ToolDefinition::new(EchoTool)),
        _ => None,
    }
}

impl PromptScript {
    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PromptError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, PromptError> {
        let script: Self =
            toml::from_str(text).map_err(|e| PromptError::Config(format!("invalid script: {e}")))?;
        if script.prompt.trim().is_empty() {
            return Err(PromptError::Config("script prompt is empty".to_string()));
        }
        Ok(script)
    }

    /// 转为描述函数；未知工具名在此失败（任何 step 之前）
    pub fn into_describe(self) -> Result<DescribeFn, PromptError> {
        let tools = self
            .tools
            .iter()
            .map(|name| builtin_tool(name).ok_or_else(|| PromptError::UnknownTool(name.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(describe_fn(move |scope| {
            for (name, text) in &self.system {
                scope.system(name, text.clone());
            }
            for (name, value) in &self.variables {
                scope.variable(name, value.clone());
            }
            for (name, value) in &self.data {
                scope.data(name, value)?;
            }
            for tool in &tools {
                scope.tool(tool.clone())?;
            }
            scope.prompt(self.prompt.clone());
            Ok(())
        }))
    }
}
