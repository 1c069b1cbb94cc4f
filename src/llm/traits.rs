//! 模型调用引擎抽象
//!
//! 编排器每个 step 向 LlmClient 提交 StepRequest（system prompt、消息、可用工具子集），
//! 拿回 StepOutput（文本、工具调用请求、结束原因）。step 记录（StepRecord）组成原始 step 日志，
//! 供 memory::history 压缩。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{Message, ToolCall};
use crate::tools::SubCallResult;

/// 本 step 可用的工具：全部，或显式名单
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveTools {
    All,
    Only(Vec<String>),
}

impl ActiveTools {
    pub fn allows(&self, name: &str) -> bool {
        match self {
            ActiveTools::All => true,
            ActiveTools::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

/// 提供给模型的工具说明（名称、描述、参数 JSON Schema）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 单个 step 的模型请求
#[derive(Clone, Debug, Serialize)]
pub struct StepRequest {
    pub step: usize,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    /// 全部已声明工具；是否可调用以 active_tools 为准
    pub tools: Vec<ToolSpec>,
    pub active_tools: ActiveTools,
}

impl StepRequest {
    /// 实际送给模型的 prompt：system（如有）+ 消息
    pub fn prompt_messages(&self) -> Vec<Message> {
        let mut prompt = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system_prompt {
            prompt.push(Message::system(system.clone()));
        }
        prompt.extend(self.messages.iter().cloned());
        prompt
    }

    /// 按 active_tools 过滤后的工具说明
    pub fn active_tool_specs(&self) -> Vec<&ToolSpec> {
        self.tools
            .iter()
            .filter(|t| self.active_tools.allows(&t.name))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
    Other,
}

/// 模型对单个 step 的输出
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

impl StepOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    /// 送给模型的完整 prompt 消息（含 system）
    pub prompt: Vec<Message>,
    pub active_tools: ActiveTools,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutputRecord {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

/// 一次工具调用的结果；组合工具 / 组合智能体附带逐项子结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub name: String,
    pub args: Value,
    pub output: Value,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_results: Vec<SubCallResult>,
}

/// 原始（未压缩）step 日志中的一条
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub input: StepInput,
    pub output: StepOutputRecord,
    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,
    /// step 结束时 StateStore 的快照
    #[serde(default)]
    pub state: Value,
}

/// 模型调用引擎：每个 step 调用一次
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &StepRequest) -> Result<StepOutput, String>;

    /// 后端名称（日志用）
    fn name(&self) -> &str {
        "llm"
    }
}
