//! 消息层：对话消息类型与压缩后的 step 历史

pub mod conversation;
pub mod history;

pub use conversation::{Message, Role, ToolCall};
pub use history::{compress, CompressedHistory, CompressedStep, HistoryStats, MessagePool};
