//! Echo 工具：回显文本，脚本与测试使用

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::schema::input_schema;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// 要回显的文本
    pub text: String,
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Args: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        input_schema::<EchoArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: EchoArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        Ok(json!({ "echo": args.text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let out = EchoTool.execute(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!({"echo": "hi"}));
        assert!(EchoTool.execute(json!({})).await.is_err());
        assert_eq!(EchoTool.parameters_schema()["required"], json!(["text"]));
    }
}
