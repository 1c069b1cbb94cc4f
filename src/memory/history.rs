//! 压缩后的 step 历史
//!
//! 原始 step 日志中每个 step 都携带完整 prompt，长对话下内存按步数平方增长。
//! 这里把所有消息去重进一个只追加的 MessagePool，每个 step 只保存下标列表与 delta 起点。

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::PromptError;
use crate::llm::{StepInput, StepRecord};
use crate::memory::Message;

/// 去重消息池：按完整结构相等去重（同一 system 消息在不同时刻出现也只存一份）
#[derive(Debug, Default, Clone, Serialize)]
pub struct MessagePool {
    messages: Vec<Message>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl MessagePool {
    /// 返回消息在池中的下标，首次出现时追加
    fn intern(&mut self, message: &Message) -> usize {
        let key = serde_json::to_string(message).unwrap_or_else(|_| format!("{message:?}"));
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.messages.len();
        self.messages.push(message.clone());
        self.index.insert(key, i);
        i
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressedStep {
    pub step_index: usize,
    pub message_refs: Vec<usize>,
    /// 与上一 step 的下标列表第一个不同的位置
    pub delta_start: usize,
    pub state: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryStats {
    pub unique_messages: usize,
    pub total_messages: usize,
    /// 1 - unique / total；没有任何消息时为 0
    pub savings_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressedHistory {
    pub message_pool: MessagePool,
    pub steps: Vec<CompressedStep>,
    /// 不进入池的 step 数据（输出、工具结果），用于 get_step 还原
    #[serde(skip)]
    raw: Vec<StepRecord>,
}

/// 增量构建压缩历史
pub fn compress(raw_steps: &[StepRecord]) -> CompressedHistory {
    let mut pool = MessagePool::default();
    let mut steps: Vec<CompressedStep> = Vec::with_capacity(raw_steps.len());

    for (i, record) in raw_steps.iter().enumerate() {
        let refs: Vec<usize> = record.input.prompt.iter().map(|m| pool.intern(m)).collect();
        let delta_start = match steps.last() {
            Some(prev) => prev
                .message_refs
                .iter()
                .zip(refs.iter())
                .take_while(|(a, b)| a == b)
                .count(),
            None => 0,
        };
        steps.push(CompressedStep {
            step_index: i,
            message_refs: refs,
            delta_start,
            state: record.state.clone(),
        });
    }

    tracing::debug!(
        steps = steps.len(),
        unique = pool.len(),
        "step history compressed"
    );
    CompressedHistory {
        message_pool: pool,
        steps,
        raw: raw_steps.iter().map(strip_prompt).collect(),
    }
}

/// 原始记录去掉 prompt（prompt 由消息池还原）
fn strip_prompt(record: &StepRecord) -> StepRecord {
    StepRecord {
        input: StepInput {
            prompt: Vec::new(),
            active_tools: record.input.active_tools.clone(),
        },
        ..record.clone()
    }
}

impl CompressedHistory {
    fn compressed(&self, index: usize) -> Result<&CompressedStep, PromptError> {
        self.steps.get(index).ok_or(PromptError::StepOutOfRange {
            index,
            len: self.steps.len(),
        })
    }

    fn resolve(&self, refs: &[usize]) -> Vec<Message> {
        refs.iter()
            .filter_map(|&i| self.message_pool.get(i).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 还原第 index 个 step 的完整记录（prompt 从消息池重建）
    pub fn get_step(&self, index: usize) -> Result<StepRecord, PromptError> {
        let step = self.compressed(index)?;
        let mut record = self.raw[index].clone();
        record.input.prompt = self.resolve(&step.message_refs);
        Ok(record)
    }

    /// 相比上一 step 新增（或被替换）的消息
    pub fn get_delta_messages(&self, index: usize) -> Result<Vec<Message>, PromptError> {
        let step = self.compressed(index)?;
        Ok(self.resolve(&step.message_refs[step.delta_start..]))
    }

    pub fn get_state(&self, index: usize) -> Result<&Value, PromptError> {
        Ok(&self.compressed(index)?.state)
    }

    pub fn get_stats(&self) -> HistoryStats {
        let total: usize = self.steps.iter().map(|s| s.message_refs.len()).sum();
        let unique = self.message_pool.len();
        let savings_ratio = if total == 0 {
            0.0
        } else {
            1.0 - unique as f64 / total as f64
        };
        HistoryStats {
            unique_messages: unique,
            total_messages: total,
            savings_ratio,
        }
    }
}
