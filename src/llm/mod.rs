//! LLM 层：模型调用引擎接口与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use traits::{
    ActiveTools, FinishReason, LlmClient, StepInput, StepOutput, StepOutputRecord, StepRecord,
    StepRequest, ToolResultRecord, ToolSpec,
};

use std::sync::Arc;

use crate::config::LlmSection;
use crate::core::PromptError;

/// 按 [llm] 段创建模型调用引擎；具体 provider 的解析不在本 crate 内，只内置 mock
pub fn create_llm_from_config(section: &LlmSection) -> Result<Arc<dyn LlmClient>, PromptError> {
    match section.provider.as_str() {
        "mock" => Ok(Arc::new(MockLlmClient)),
        other => Err(PromptError::Config(format!(
            "provider '{other}' is not built in; supply an LlmClient implementation"
        ))),
    }
}
