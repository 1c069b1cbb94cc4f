//! 工具执行：超时 + 审计日志
//!
//! 对每次工具 / 子工具调用施加超时；超时或失败都转为错误字符串，由调用方决定如何呈现给模型。
//! 每次调用输出一条结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::PromptError;
use crate::tools::Tool;

/// 在超时内执行工具；工具返回 Err 转为 ToolExecutionFailed，超时转为 ToolTimeout
pub async fn execute_tool(tool: &dyn Tool, args: Value, limit: Duration) -> Result<Value, String> {
    let start = Instant::now();
    let args_preview = args_preview(&args);
    let result = timeout(limit, tool.execute(args)).await;

    let (ok, outcome): (bool, &str) = match &result {
        Ok(Ok(_)) => (true, "ok"),
        Ok(Err(_)) => (false, "error"),
        Err(_) => (false, "timeout"),
    };
    let duration_ms = start.elapsed().as_millis() as u64;
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool.name(),
        "ok": ok,
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(PromptError::ToolExecutionFailed(e).to_string()),
        Err(_) => Err(PromptError::ToolTimeout(tool.name().to_string()).to_string()),
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
