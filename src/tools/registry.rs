//! 工具定义
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute）；
//! 描述函数通过 ToolDefinition 声明单个工具、组合工具或（经 agent 模块）智能体。
//! 单次调用遵循 beforeCall -> execute -> onSuccess / onError 的可选回调协议，
//! 回调返回 Some 即以该值短路。

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};

use crate::agent::{AgentBatch, AgentRunner, ParentContext, SubAgent};
use crate::core::PromptError;
use crate::llm::ToolSpec;
use crate::tools::composite::{
    panic_message, CompositeArgs, CompositeDispatcher, SubCallResult, ToolBatch,
};
use crate::tools::executor::execute_tool;
use crate::tools::schema::{composite_schema, InputValidator};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args / 输出均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String>;
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// 由闭包构成的工具
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    f: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            f: Arc::new(move |args| Box::pin(f(args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        (self.f)(args).await
    }
}

pub type BeforeCallFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;
pub type OnSuccessFn = Arc<dyn Fn(&Value, &Value) -> Option<Value> + Send + Sync>;
pub type OnErrorFn = Arc<dyn Fn(&Value, &str) -> Option<Value> + Send + Sync>;

/// 可选调用回调
#[derive(Clone, Default)]
pub struct ToolHooks {
    before_call: Option<BeforeCallFn>,
    on_success: Option<OnSuccessFn>,
    on_error: Option<OnErrorFn>,
}

impl ToolHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行前调用；返回 Some 则跳过执行，直接作为输出
    pub fn before_call(
        mut self,
        f: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.before_call = Some(Arc::new(f));
        self
    }

    /// 执行成功后调用；返回 Some 则替换输出
    pub fn on_success(
        mut self,
        f: impl Fn(&Value, &Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// 执行失败后调用；返回 Some 则以该值作为成功输出
    pub fn on_error(
        mut self,
        f: impl Fn(&Value, &str) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

/// 按回调协议执行一次调用
pub async fn call_with_hooks<F, Fut>(
    hooks: &ToolHooks,
    args: Value,
    execute: F,
) -> Result<Value, String>
where
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = Result<Value, String>>,
{
    if let Some(before) = &hooks.before_call {
        if let Some(output) = before(&args) {
            return Ok(output);
        }
    }
    match execute(args.clone()).await {
        Ok(output) => match &hooks.on_success {
            Some(cb) => Ok(cb(&args, &output).unwrap_or(output)),
            None => Ok(output),
        },
        Err(e) => match hooks.on_error.as_ref().and_then(|cb| cb(&args, &e)) {
            Some(output) => Ok(output),
            None => Err(e),
        },
    }
}

/// 组合工具中的一个子工具
#[derive(Clone)]
pub struct SubTool {
    pub(crate) tool: Arc<dyn Tool>,
    pub(crate) hooks: ToolHooks,
    pub(crate) validator: Option<Arc<InputValidator>>,
}

impl SubTool {
    pub fn new(tool: impl Tool + 'static) -> Self {
        Self::from_arc(Arc::new(tool))
    }

    pub fn from_arc(tool: Arc<dyn Tool>) -> Self {
        Self {
            tool,
            hooks: ToolHooks::default(),
            validator: None,
        }
    }

    pub fn with_hooks(mut self, hooks: ToolHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    /// 在子工具上执行一次调用：参数校验 -> 回调协议 -> 超时执行
    pub(crate) async fn call(&self, args: Value, limit: Duration) -> Result<Value, String> {
        if let Some(validator) = &self.validator {
            validator.check(&args)?;
        }
        let tool = self.tool.clone();
        call_with_hooks(&self.hooks, args, |a| async move {
            execute_tool(tool.as_ref(), a, limit).await
        })
        .await
    }
}

#[derive(Clone)]
pub enum ToolKind {
    Single(SubTool),
    Composite(Vec<SubTool>),
    Agent(AgentRunner),
    CompositeAgent(Vec<SubAgent>),
}

/// 一次工具调用的结果
#[derive(Clone, Debug)]
pub struct Invocation {
    pub output: Value,
    pub is_error: bool,
    pub sub_results: Vec<SubCallResult>,
}

impl Invocation {
    fn ok(output: Value) -> Self {
        Self {
            output,
            is_error: false,
            sub_results: Vec::new(),
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            output: json!({ "error": message.into() }),
            is_error: true,
            sub_results: Vec::new(),
        }
    }

    fn batch(results: Vec<SubCallResult>) -> Self {
        Self {
            output: serde_json::to_value(&results).unwrap_or(Value::Null),
            is_error: false,
            sub_results: results,
        }
    }
}

/// 描述函数声明的工具（单个 / 组合 / 智能体 / 组合智能体）
#[derive(Clone)]
pub struct ToolDefinition {
    name: String,
    description: String,
    input_schema: Value,
    kind: ToolKind,
    validator: Option<Arc<InputValidator>>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ToolKind::Single(_) => "single",
            ToolKind::Composite(_) => "composite",
            ToolKind::Agent(_) => "agent",
            ToolKind::CompositeAgent(_) => "composite_agent",
        };
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

impl ToolDefinition {
    /// 单个工具：名称、描述、schema 取自 Tool 实现
    pub fn new(tool: impl Tool + 'static) -> Self {
        Self::single(SubTool::new(tool))
    }

    pub fn single(sub: SubTool) -> Self {
        Self {
            name: sub.tool.name().to_string(),
            description: sub.tool.description().to_string(),
            input_schema: sub.tool.parameters_schema(),
            kind: ToolKind::Single(sub),
            validator: None,
        }
    }

    /// 组合工具：一次调用携带 `{calls: [{name, args}, ...]}`，逐项分派到子工具
    pub fn composite(
        name: impl Into<String>,
        description: impl Into<String>,
        subs: Vec<SubTool>,
    ) -> Self {
        let schemas: Vec<(String, String, Value)> = subs
            .iter()
            .map(|s| {
                (
                    s.tool.name().to_string(),
                    s.tool.description().to_string(),
                    s.tool.parameters_schema(),
                )
            })
            .collect();
        let input_schema =
            composite_schema(schemas.iter().map(|(n, d, s)| (n.as_str(), d.as_str(), s)));
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::Composite(subs),
            validator: None,
        }
    }

    pub(crate) fn from_parts(
        name: String,
        description: String,
        input_schema: Value,
        kind: ToolKind,
    ) -> Self {
        Self {
            name,
            description,
            input_schema,
            kind,
            validator: None,
        }
    }

    /// 单个工具 / 单个智能体使用的回调
    pub fn with_hooks(mut self, hooks: ToolHooks) -> Self {
        match &mut self.kind {
            ToolKind::Single(sub) => sub.hooks = hooks,
            ToolKind::Agent(runner) => runner.hooks = hooks,
            ToolKind::Composite(_) | ToolKind::CompositeAgent(_) => {
                tracing::warn!(
                    tool = %self.name,
                    "hooks on a composite apply per sub-definition; ignored"
                );
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn kind(&self) -> &ToolKind {
        &self.kind
    }

    pub fn is_agent(&self) -> bool {
        matches!(self.kind, ToolKind::Agent(_) | ToolKind::CompositeAgent(_))
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    /// 编译全部参数校验器；非法 schema 为配置错误
    pub(crate) fn compile(&mut self) -> Result<(), PromptError> {
        match &mut self.kind {
            ToolKind::Single(sub) => {
                sub.validator = Some(Arc::new(InputValidator::compile(
                    &self.name,
                    &self.input_schema,
                )?));
            }
            ToolKind::Agent(_) => {
                self.validator = Some(Arc::new(InputValidator::compile(
                    &self.name,
                    &self.input_schema,
                )?));
            }
            ToolKind::Composite(subs) => {
                for sub in subs.iter_mut() {
                    let schema = sub.tool.parameters_schema();
                    sub.validator =
                        Some(Arc::new(InputValidator::compile(sub.tool.name(), &schema)?));
                }
            }
            ToolKind::CompositeAgent(subs) => {
                for sub in subs.iter_mut() {
                    sub.compile()?;
                }
            }
        }
        Ok(())
    }

    /// 执行一次调用；错误（含 panic）转为 `{"error": ...}` 输出，组合调用的逐项失败体现在子结果中
    pub async fn invoke(&self, args: Value, parent: &ParentContext) -> Invocation {
        AssertUnwindSafe(self.dispatch(args, parent))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let detail = panic_message(panic);
                tracing::warn!(tool = %self.name, panic = %detail, "tool panicked");
                Invocation::error(format!("tool panicked: {detail}"))
            })
    }

    async fn dispatch(&self, args: Value, parent: &ParentContext) -> Invocation {
        if let Some(validator) = &self.validator {
            if let Err(e) = validator.check(&args) {
                return Invocation::error(e);
            }
        }
        match &self.kind {
            ToolKind::Single(sub) => match sub.call(args, parent.options.tool_timeout).await {
                Ok(output) => Invocation::ok(output),
                Err(e) => Invocation::error(e),
            },
            ToolKind::Agent(runner) => {
                let result = call_with_hooks(&runner.hooks, args, |a| async move {
                    runner.run(a, parent).await.map(|o| Value::String(o.response))
                })
                .await;
                match result {
                    Ok(output) => Invocation::ok(output),
                    Err(e) => Invocation::error(e),
                }
            }
            ToolKind::Composite(subs) => match CompositeArgs::parse(args) {
                Ok(batch) => {
                    let runner = ToolBatch::new(subs, parent.options.tool_timeout);
                    Invocation::batch(CompositeDispatcher::dispatch(&runner, batch.calls).await)
                }
                Err(e) => Invocation::error(e),
            },
            ToolKind::CompositeAgent(subs) => match CompositeArgs::parse(args) {
                Ok(batch) => {
                    let runner = AgentBatch::new(subs, parent);
                    Invocation::batch(CompositeDispatcher::dispatch(&runner, batch.calls).await)
                }
                Err(e) => Invocation::error(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doubler() -> FnTool {
        FnTool::new(
            "double",
            "Double a number",
            json!({"type": "object", "properties": {"n": {"type": "integer"}}, "required": ["n"]}),
            |args| async move {
                let n = args["n"].as_i64().ok_or("n missing")?;
                Ok(json!(n * 2))
            },
        )
    }

    #[tokio::test]
    async fn test_before_call_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = ToolHooks::new().before_call(|_| Some(json!("cached")));
        let out = call_with_hooks(&hooks, json!({}), |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("fresh"))
        })
        .await;
        assert_eq!(out.unwrap(), json!("cached"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_on_success_and_on_error_replace() {
        let hooks = ToolHooks::new()
            .on_success(|_, out| Some(json!({"wrapped": out})))
            .on_error(|_, e| Some(json!({"recovered": e})));
        let ok = call_with_hooks(&hooks, json!({}), |_| async { Ok(json!(1)) }).await;
        assert_eq!(ok.unwrap(), json!({"wrapped": 1}));
        let err = call_with_hooks(&hooks, json!({}), |_| async { Err("bad".to_string()) }).await;
        assert_eq!(err.unwrap(), json!({"recovered": "bad"}));

        // 回调返回 None 时保持原结果
        let passthrough = ToolHooks::new().on_error(|_, _| None);
        let err =
            call_with_hooks(&passthrough, json!({}), |_| async { Err("bad".to_string()) }).await;
        assert_eq!(err.unwrap_err(), "bad");
    }

    #[test]
    fn test_definition_from_tool() {
        let def = ToolDefinition::new(doubler());
        assert_eq!(def.name(), "double");
        assert_eq!(def.spec().parameters["required"], json!(["n"]));
        assert!(!def.is_agent());
    }

    #[test]
    fn test_composite_schema_lists_subs() {
        let def = ToolDefinition::composite("math", "Math ops", vec![SubTool::new(doubler())]);
        let variants = def.input_schema()["properties"]["calls"]["items"]["oneOf"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0]["properties"]["args"]["required"], json!(["n"]));
    }

    #[tokio::test]
    async fn test_single_invoke_validates_args() {
        let mut def = ToolDefinition::new(doubler());
        def.compile().unwrap();
        let parent = ParentContext::for_tests();
        let inv = def.invoke(json!({"n": 4}), &parent).await;
        assert_eq!(inv.output, json!(8));
        assert!(!inv.is_error);

        let inv = def.invoke(json!({"n": "four"}), &parent).await;
        assert!(inv.is_error);
        assert!(inv.output["error"].as_str().unwrap().contains("Invalid arguments"));
    }

    #[test]
    fn test_invalid_schema_rejected_on_compile() {
        let tool = FnTool::new("broken", "", json!({"type": 5}), |_| async { Ok(Value::Null) });
        let mut def = ToolDefinition::new(tool);
        assert!(matches!(def.compile(), Err(PromptError::InvalidSchema { .. })));
    }
}
