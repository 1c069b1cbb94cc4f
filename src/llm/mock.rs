//! Mock 模型客户端（用于测试与 CLI，无需 API）
//!
//! - MockLlmClient：取最后一条 User 消息回显，直接结束（finish_reason = stop）
//! - ScriptedLlmClient：按顺序回放预设的 StepOutput，并记录每次收到的 StepRequest，便于断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, StepOutput, StepRequest};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: &StepRequest) -> Result<StepOutput, String> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(StepOutput::text(format!("Echo from Mock: {}", last_user)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：依次返回预设输出；脚本耗尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    outputs: Mutex<VecDeque<StepOutput>>,
    requests: Mutex<Vec<StepRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(outputs: impl IntoIterator<Item = StepOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的全部请求（按 step 顺序）
    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(&self, request: &StepRequest) -> Result<StepOutput, String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| format!("script exhausted at step {}", request.step))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ActiveTools;
    use crate::memory::Message;

    fn request(messages: Vec<Message>) -> StepRequest {
        StepRequest {
            step: 0,
            system_prompt: None,
            messages,
            tools: Vec::new(),
            active_tools: ActiveTools::All,
        }
    }

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let out = MockLlmClient
            .generate(&request(vec![Message::user("first"), Message::user("second")]))
            .await
            .unwrap();
        assert_eq!(out.text, "Echo from Mock: second");
    }

    #[tokio::test]
    async fn test_scripted_replays_and_records() {
        let client = ScriptedLlmClient::new(vec![StepOutput::text("a")]);
        let out = client.generate(&request(vec![Message::user("q")])).await.unwrap();
        assert_eq!(out.text, "a");
        assert!(client.generate(&request(Vec::new())).await.is_err());
        assert_eq!(client.requests().len(), 2);
    }
}
