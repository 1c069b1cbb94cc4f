//! 工具参数 Schema：生成与校验
//!
//! - input_schema::<T>()：schemars 从类型生成参数 JSON Schema
//! - composite_schema：组合工具 / 组合智能体对外公布的 `{calls: [...]}` schema，按子名称做 tagged union
//! - InputValidator：声明时用 jsonschema 编译，调用时校验参数

use std::fmt;

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

use crate::core::PromptError;

/// 从 Rust 类型生成参数 JSON Schema
pub fn input_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}))
}

/// 组合调用的 schema：每一项是 `{name: <常量子名称>, args: <子 schema>}` 的 oneOf
pub fn composite_schema<'a>(
    subs: impl IntoIterator<Item = (&'a str, &'a str, &'a Value)>,
) -> Value {
    let variants: Vec<Value> = subs
        .into_iter()
        .map(|(name, description, schema)| {
            json!({
                "type": "object",
                "description": description,
                "properties": {
                    "name": { "const": name },
                    "args": schema,
                },
                "required": ["name", "args"],
            })
        })
        .collect();
    json!({
        "type": "object",
        "properties": {
            "calls": {
                "type": "array",
                "items": { "oneOf": variants },
            }
        },
        "required": ["calls"],
    })
}

/// 已编译的参数校验器
pub struct InputValidator {
    compiled: jsonschema::Validator,
}

impl fmt::Debug for InputValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InputValidator")
    }
}

impl InputValidator {
    /// 编译 schema；失败视为配置错误
    pub fn compile(name: &str, schema: &Value) -> Result<Self, PromptError> {
        let compiled = jsonschema::validator_for(schema).map_err(|err| PromptError::InvalidSchema {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { compiled })
    }

    pub fn check(&self, args: &Value) -> Result<(), String> {
        if self.compiled.is_valid(args) {
            return Ok(());
        }
        let messages = self
            .compiled
            .iter_errors(args)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(PromptError::InvalidArgs(messages.join("; ")).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct SearchArgs {
        /// 查询关键词
        query: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_input_schema_from_type() {
        let schema = input_schema::<SearchArgs>();
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn test_validator_accepts_and_rejects() {
        let schema = json!({
            "type": "object",
            "properties": {"n": {"type": "integer"}},
            "required": ["n"]
        });
        let validator = InputValidator::compile("calc", &schema).unwrap();
        assert!(validator.check(&json!({"n": 1})).is_ok());
        let err = validator.check(&json!({"n": "x"})).unwrap_err();
        assert!(err.starts_with("Invalid arguments: "));
    }

    #[test]
    fn test_invalid_schema_is_config_error() {
        let err = InputValidator::compile("bad", &json!({"type": 12})).unwrap_err();
        assert!(matches!(err, PromptError::InvalidSchema { ref name, .. } if name == "bad"));
    }

    #[test]
    fn test_composite_schema_shape() {
        let a = json!({"type": "object"});
        let schema = composite_schema(vec![("add", "Add numbers", &a), ("sub", "Subtract", &a)]);
        let variants = schema["properties"]["calls"]["items"]["oneOf"].as_array().unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0]["properties"]["name"]["const"], "add");

        let validator = InputValidator::compile("math", &schema).unwrap();
        assert!(validator
            .check(&json!({"calls": [{"name": "add", "args": {}}]}))
            .is_ok());
        assert!(validator
            .check(&json!({"calls": [{"name": "mul", "args": {}}]}))
            .is_err());
    }
}
