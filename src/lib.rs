//! reprompt - 声明式多步 LLM 对话的重执行 / 协调引擎
//!
//! 模块划分：
//! - **agent**: 智能体定义（以工具调用的形式运行嵌套对话）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态、定义追踪、effect、system prompt 渲染、主控循环
//! - **llm**: 模型调用引擎接口与 Mock 实现
//! - **memory**: 对话消息与压缩后的 step 历史
//! - **observability**: tracing 初始化
//! - **script**: CLI 使用的 TOML prompt 脚本
//! - **tools**: 工具定义、组合分发、参数 schema 与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod script;
pub mod tools;

pub use crate::agent::{AgentDefinition, SubAgent};
pub use crate::core::{
    describe_fn, Conversation, ConversationOptions, Dep, DefinitionHandle, PromptError,
    RunOutcome, Scope, StepModifier,
};
pub use crate::tools::{FnTool, SubTool, Tool, ToolDefinition, ToolHooks};
