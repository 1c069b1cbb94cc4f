//! 智能体定义：以一次工具调用的形式运行嵌套对话
//!
//! factory(args) 产出子对话的描述函数；子对话拥有独立的 StateStore / EffectsManager / DefinitionTracker，
//! 未指定 llm 时复用父对话的模型句柄，并继承父对话的 ConversationOptions。
//! 单个智能体把子对话最终文本作为工具输出；组合智能体逐项返回 `{name, response}` 并附带子 step 日志。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::LocalBoxFuture;
use serde_json::Value;

use crate::core::{Conversation, ConversationOptions, DescribeFn, PromptError};
use crate::llm::{LlmClient, StepRecord};
use crate::tools::composite::{SubCallRunner, SubCallSuccess};
use crate::tools::schema::{composite_schema, InputValidator};
use crate::tools::{call_with_hooks, ToolDefinition, ToolHooks, ToolKind};

pub type AgentFactory = Arc<dyn Fn(Value) -> Result<DescribeFn, PromptError> + Send + Sync>;

/// 子对话运行所需的父级上下文
#[derive(Clone)]
pub struct ParentContext {
    pub llm: Arc<dyn LlmClient>,
    pub options: ConversationOptions,
}

impl ParentContext {
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            llm: Arc::new(crate::llm::MockLlmClient),
            options: ConversationOptions::default(),
        }
    }
}

/// 子对话运行结果
#[derive(Debug)]
pub struct AgentOutcome {
    pub response: String,
    pub steps: Vec<StepRecord>,
}

/// 运行一个子对话
#[derive(Clone)]
pub struct AgentRunner {
    factory: AgentFactory,
    llm: Option<Arc<dyn LlmClient>>,
    pub(crate) hooks: ToolHooks,
}

impl AgentRunner {
    fn new(factory: AgentFactory) -> Self {
        Self {
            factory,
            llm: None,
            hooks: ToolHooks::default(),
        }
    }

    /// 子对话与父对话互相递归，这里返回装箱 future
    pub fn run<'a>(
        &'a self,
        args: Value,
        parent: &'a ParentContext,
    ) -> LocalBoxFuture<'a, Result<AgentOutcome, String>> {
        Box::pin(async move {
            let describe = (self.factory)(args).map_err(|e| e.to_string())?;
            let llm = self.llm.clone().unwrap_or_else(|| parent.llm.clone());
            let mut child = Conversation::builder(llm)
                .options(parent.options.clone())
                .describe_boxed(describe)
                .build()
                .map_err(|e| e.to_string())?;
            let outcome = child.run().await.map_err(|e| e.to_string())?;
            Ok(AgentOutcome {
                response: outcome.text,
                steps: outcome.steps,
            })
        })
    }
}

/// 组合智能体中的一个子智能体
#[derive(Clone)]
pub struct SubAgent {
    name: String,
    description: String,
    input_schema: Value,
    runner: AgentRunner,
    validator: Option<Arc<InputValidator>>,
}

impl SubAgent {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        factory: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<DescribeFn, PromptError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            runner: AgentRunner::new(Arc::new(factory)),
            validator: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.runner.llm = Some(llm);
        self
    }

    pub fn with_hooks(mut self, hooks: ToolHooks) -> Self {
        self.runner.hooks = hooks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn compile(&mut self) -> Result<(), PromptError> {
        self.validator = Some(Arc::new(InputValidator::compile(&self.name, &self.input_schema)?));
        Ok(())
    }

    async fn call(&self, args: Value, parent: &ParentContext) -> Result<AgentOutcome, String> {
        if let Some(validator) = &self.validator {
            validator.check(&args)?;
        }
        let mut steps = Vec::new();
        let steps_slot = &mut steps;
        let runner = &self.runner;
        let response = call_with_hooks(&self.runner.hooks, args, |a| async move {
            let outcome = runner.run(a, parent).await?;
            *steps_slot = outcome.steps;
            Ok(Value::String(outcome.response))
        })
        .await?;
        Ok(AgentOutcome {
            response: match response {
                Value::String(s) => s,
                other => other.to_string(),
            },
            steps,
        })
    }
}

/// 声明用的智能体定义（单个或组合），由 Scope::agent 转为工具定义
pub struct AgentDefinition {
    name: String,
    description: String,
    input_schema: Value,
    kind: ToolKind,
}

impl AgentDefinition {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        factory: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<DescribeFn, PromptError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::Agent(AgentRunner::new(Arc::new(factory))),
        }
    }

    pub fn composite(
        name: impl Into<String>,
        description: impl Into<String>,
        subs: Vec<SubAgent>,
    ) -> Self {
        let input_schema = composite_schema(
            subs.iter()
                .map(|s| (s.name.as_str(), s.description.as_str(), &s.input_schema)),
        );
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::CompositeAgent(subs),
        }
    }

    /// 覆盖子对话使用的模型（仅单个智能体）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        if let ToolKind::Agent(runner) = &mut self.kind {
            runner.llm = Some(llm);
        }
        self
    }

    pub fn with_hooks(mut self, hooks: ToolHooks) -> Self {
        if let ToolKind::Agent(runner) = &mut self.kind {
            runner.hooks = hooks;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_tool(self) -> ToolDefinition {
        ToolDefinition::from_parts(self.name, self.description, self.input_schema, self.kind)
    }
}

/// 组合智能体的执行者：按顺序逐个运行子对话
pub struct AgentBatch<'a> {
    subs: &'a [SubAgent],
    parent: &'a ParentContext,
}

impl<'a> AgentBatch<'a> {
    pub fn new(subs: &'a [SubAgent], parent: &'a ParentContext) -> Self {
        Self { subs, parent }
    }
}

#[async_trait(?Send)]
impl SubCallRunner for AgentBatch<'_> {
    fn names(&self) -> Vec<&str> {
        self.subs.iter().map(|s| s.name()).collect()
    }

    async fn run(&self, name: &str, args: Value) -> Result<SubCallSuccess, String> {
        let sub = self
            .subs
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| format!("Unknown sub-call '{name}'"))?;
        let outcome = sub.call(args, self.parent).await?;
        Ok(SubCallSuccess::Agent {
            response: Value::String(outcome.response),
            steps: outcome.steps,
        })
    }
}
