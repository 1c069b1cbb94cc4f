//! CompositeDispatcher：把一次组合调用拆成多个具名子调用，逐项顺序执行
//!
//! 未知子名称、参数校验失败、执行返回错误、甚至 panic，都只转为该项的 error 结果，
//! 不会中断同批次后续子调用；结果按原顺序返回。

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::StepRecord;
use crate::tools::SubTool;

/// 组合调用中的一项
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// 组合调用的参数：`{calls: [{name, args}, ...]}`
#[derive(Clone, Debug, Deserialize)]
pub struct CompositeArgs {
    pub calls: Vec<SubCall>,
}

impl CompositeArgs {
    pub fn parse(args: Value) -> Result<Self, String> {
        serde_json::from_value(args).map_err(|e| format!("invalid composite arguments: {e}"))
    }
}

/// 子调用结果：工具返回 result，智能体返回 response，失败时带 error
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubCallResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 子智能体自己的 step 日志（不发送给模型）
    #[serde(skip)]
    pub steps: Vec<StepRecord>,
}

impl SubCallResult {
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 子调用成功的输出
#[derive(Debug)]
pub enum SubCallSuccess {
    Tool(Value),
    Agent { response: Value, steps: Vec<StepRecord> },
}

/// 一组具名子定义的执行者（子工具 / 子智能体）
#[async_trait(?Send)]
pub trait SubCallRunner {
    fn names(&self) -> Vec<&str>;

    async fn run(&self, name: &str, args: Value) -> Result<SubCallSuccess, String>;
}

pub struct CompositeDispatcher;

impl CompositeDispatcher {
    /// 按数组顺序逐项执行；任何一项失败只影响该项
    pub async fn dispatch(runner: &dyn SubCallRunner, calls: Vec<SubCall>) -> Vec<SubCallResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if !runner.names().contains(&call.name.as_str()) {
                let available = runner.names().join(", ");
                tracing::warn!(sub_call = %call.name, "unknown sub-call");
                results.push(SubCallResult::failed(
                    &call.name,
                    format!("Unknown sub-call '{}'. Available: {}", call.name, available),
                ));
                continue;
            }

            let outcome = AssertUnwindSafe(runner.run(&call.name, call.args))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(format!("sub-call panicked: {}", panic_message(panic)))
                });

            let result = match outcome {
                Ok(SubCallSuccess::Tool(value)) => SubCallResult {
                    name: call.name,
                    result: Some(value),
                    ..SubCallResult::default()
                },
                Ok(SubCallSuccess::Agent { response, steps }) => SubCallResult {
                    name: call.name,
                    response: Some(response),
                    steps,
                    ..SubCallResult::default()
                },
                Err(e) => {
                    tracing::warn!(sub_call = %call.name, error = %e, "sub-call failed");
                    SubCallResult::failed(call.name, e)
                }
            };
            results.push(result);
        }
        results
    }
}

/// panic 载荷中的文本
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// 组合工具的执行者
pub struct ToolBatch<'a> {
    subs: &'a [SubTool],
    timeout: Duration,
}

impl<'a> ToolBatch<'a> {
    pub fn new(subs: &'a [SubTool], timeout: Duration) -> Self {
        Self { subs, timeout }
    }
}

#[async_trait(?Send)]
impl SubCallRunner for ToolBatch<'_> {
    fn names(&self) -> Vec<&str> {
        self.subs.iter().map(|s| s.name()).collect()
    }

    async fn run(&self, name: &str, args: Value) -> Result<SubCallSuccess, String> {
        let sub = self
            .subs
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| format!("Unknown sub-call '{name}'"))?;
        sub.call(args, self.timeout).await.map(SubCallSuccess::Tool)
    }
}
