//! 对话过程事件：可选地推送给前端 / 日志消费者

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::definitions::KindClass;
use crate::llm::FinishReason;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    StepStarted { step: usize },
    /// 重执行后未再声明而被删除的定义
    DefinitionPruned { class: KindClass, name: String },
    EffectRan { step: usize, effect: usize },
    ToolCall { tool: String, args: serde_json::Value },
    ToolResult { tool: String, ok: bool },
    StepFinished { step: usize, finish_reason: FinishReason },
}

pub(crate) fn send_event(tx: &Option<UnboundedSender<ConversationEvent>>, ev: ConversationEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
