//! 对话引擎错误类型
//!
//! 分层：配置错误（缺模型、非法 schema）在任何 step 之前失败；describe / effect 阶段错误直接终止整个运行；
//! 子调用错误只在 CompositeDispatcher 内被捕获并转成单条结果，不会走到这里。

use thiserror::Error;

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Config error: {0}")]
    Config(String),

    /// 工具 / 智能体声明的输入 schema 无法编译
    #[error("Invalid schema for '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },

    /// 描述函数本身返回的错误
    #[error("Describe failed: {0}")]
    Describe(String),

    #[error("Effect failed: {0}")]
    Effect(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// 状态值与目标类型之间的（反）序列化失败
    #[error("State '{key}' error: {source}")]
    State {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Step index {index} out of range (steps: {len})")]
    StepOutOfRange { index: usize, len: usize },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

impl PromptError {
    /// 供描述函数 / effect 回调快速构造错误
    pub fn describe(msg: impl Into<String>) -> Self {
        PromptError::Describe(msg.into())
    }

    pub fn effect(msg: impl Into<String>) -> Self {
        PromptError::Effect(msg.into())
    }
}

impl From<serde_yaml::Error> for PromptError {
    fn from(e: serde_yaml::Error) -> Self {
        PromptError::Serialization(e.to_string())
    }
}
