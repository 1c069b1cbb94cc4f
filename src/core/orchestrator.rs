//! Conversation：重执行 / 协调主循环
//!
//! 每个 step 分两个阶段：
//! - describe：清空活动子集过滤与 StepModifier -> （非首轮）重置 DefinitionTracker、清空 effect 注册并重跑描述函数
//!   -> 删除未再声明的定义 -> 运行 effect -> 应用 disable 与 StepModifier -> 拼 system prompt
//! - dispatch：调用模型引擎；若请求了工具则逐个执行、写回消息并进入下一 step
//!
//! 描述函数或 effect 的错误直接终止整个运行；工具错误转为工具结果消息，组合调用的子错误逐项隔离。

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::agent::ParentContext;
use crate::config::EngineSection;
use crate::core::definitions::{DefinitionTracker, KindClass};
use crate::core::effects::{EffectContext, EffectsManager, StepModifier, ToolInvocation};
use crate::core::events::{send_event, ConversationEvent};
use crate::core::handle::{SharedSignals, StepSignals};
use crate::core::prompt::{render_system_prompt, Variable};
use crate::core::scope::Scope;
use crate::core::state::StateStore;
use crate::core::PromptError;
use crate::llm::{
    ActiveTools, FinishReason, LlmClient, StepInput, StepOutput, StepOutputRecord, StepRecord,
    StepRequest, ToolResultRecord,
};
use crate::memory::{compress, CompressedHistory, Message};
use crate::tools::{Invocation, ToolDefinition};

/// 描述函数：每个 step 重新执行一次，声明本 step 的配置
pub type DescribeFn = Box<dyn FnMut(&mut Scope<'_>) -> Result<(), PromptError>>;

/// 把闭包装箱为 DescribeFn（便于闭包参数类型推断）
pub fn describe_fn<F>(f: F) -> DescribeFn
where
    F: FnMut(&mut Scope<'_>) -> Result<(), PromptError> + 'static,
{
    Box::new(f)
}

/// 运行参数：step 上限与单次工具调用超时
#[derive(Clone, Debug)]
pub struct ConversationOptions {
    pub max_steps: usize,
    pub tool_timeout: Duration,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            max_steps: 20,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&EngineSection> for ConversationOptions {
    fn from(section: &EngineSection) -> Self {
        Self {
            max_steps: section.max_steps,
            tool_timeout: Duration::from_secs(section.tool_timeout_secs),
        }
    }
}

pub struct ConversationBuilder {
    llm: Arc<dyn LlmClient>,
    describe: Option<DescribeFn>,
    options: ConversationOptions,
    event_tx: Option<UnboundedSender<ConversationEvent>>,
}

impl ConversationBuilder {
    pub fn describe<F>(self, f: F) -> Self
    where
        F: FnMut(&mut Scope<'_>) -> Result<(), PromptError> + 'static,
    {
        self.describe_boxed(Box::new(f))
    }

    pub fn describe_boxed(mut self, f: DescribeFn) -> Self {
        self.describe = Some(f);
        self
    }

    pub fn options(mut self, options: ConversationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.options.max_steps = max_steps;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.options.tool_timeout = timeout;
        self
    }

    pub fn event_sender(mut self, tx: UnboundedSender<ConversationEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 缺少描述函数或 step 上限为 0 属于配置错误
    pub fn build(self) -> Result<Conversation, PromptError> {
        let describe = self
            .describe
            .ok_or_else(|| PromptError::Config("describe function is required".to_string()))?;
        if self.options.max_steps == 0 {
            return Err(PromptError::Config("max_steps must be at least 1".to_string()));
        }
        Ok(Conversation {
            id: Uuid::new_v4().to_string(),
            llm: self.llm,
            describe,
            options: self.options,
            event_tx: self.event_tx,
            state: StateStore::new(),
            tracker: DefinitionTracker::new(),
            effects: EffectsManager::new(),
            signals: SharedSignals::default(),
            modifier: StepModifier::new(),
            variables: IndexMap::new(),
            systems: IndexMap::new(),
            tools: IndexMap::new(),
            history: Vec::new(),
            steps: Vec::new(),
            described: false,
            last_tool_call: None,
        })
    }
}

/// 一次运行的结果：最后一个 step 的文本、原始 step 日志、对话历史
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub text: String,
    pub steps: Vec<StepRecord>,
    pub messages: Vec<Message>,
}

/// 本 step 的活动子集过滤；None 表示全部
#[derive(Debug, Default)]
struct ActiveFilters {
    tools: Option<Vec<String>>,
    systems: Option<Vec<String>>,
    variables: Option<Vec<String>>,
}

/// 显式修改优先于 disable：该方面本 step 被 effect 修改过，则过滤名单就是修改名单；
/// 否则若有被禁用的定义，则为全部名称去掉禁用项
fn active_filter<'a>(
    class: KindClass,
    names: impl Iterator<Item = &'a String>,
    signals: &StepSignals,
    mutated: &[String],
) -> Option<Vec<String>> {
    if !mutated.is_empty() {
        let mut list: Vec<String> = Vec::with_capacity(mutated.len());
        for name in mutated {
            if !list.contains(name) {
                list.push(name.clone());
            }
        }
        return Some(list);
    }
    if signals.has_disabled(class) {
        return Some(
            names
                .filter(|n| !signals.is_disabled(class, n))
                .cloned()
                .collect(),
        );
    }
    None
}

/// 单个对话的编排器；独占 StateStore / DefinitionTracker / EffectsManager 与三个活动集合
pub struct Conversation {
    /// 日志关联用的运行 id
    id: String,
    llm: Arc<dyn LlmClient>,
    describe: DescribeFn,
    options: ConversationOptions,
    event_tx: Option<UnboundedSender<ConversationEvent>>,
    state: StateStore,
    tracker: DefinitionTracker,
    effects: EffectsManager,
    signals: SharedSignals,
    modifier: StepModifier,
    variables: IndexMap<String, Variable>,
    systems: IndexMap<String, String>,
    tools: IndexMap<String, ToolDefinition>,
    history: Vec<Message>,
    steps: Vec<StepRecord>,
    /// 描述函数是否已运行过（决定是否重执行协调、入口消息是否生效）
    described: bool,
    last_tool_call: Option<ToolInvocation>,
}

impl Conversation {
    pub fn builder(llm: Arc<dyn LlmClient>) -> ConversationBuilder {
        ConversationBuilder {
            llm,
            describe: None,
            options: ConversationOptions::default(),
            event_tx: None,
        }
    }

    /// 运行到自然结束（非 tool-calls 结束原因）或达到 step 上限
    pub async fn run(&mut self) -> Result<RunOutcome, PromptError> {
        let mut text = String::new();
        while self.steps.len() < self.options.max_steps {
            let step = self.steps.len();
            send_event(&self.event_tx, ConversationEvent::StepStarted { step });

            let request = self.prepare_step(step)?;
            tracing::info!(
                conversation = %self.id,
                step,
                llm = self.llm.name(),
                messages = request.messages.len(),
                active_tools = ?request.active_tools,
                "step prepared"
            );
            let output = self
                .llm
                .generate(&request)
                .await
                .map_err(PromptError::Llm)?;
            text = output.text.clone();

            if !self.dispatch_step(request, output).await {
                break;
            }
        }
        if self.steps.len() >= self.options.max_steps {
            tracing::info!(
                conversation = %self.id,
                max_steps = self.options.max_steps,
                "step limit reached"
            );
        }
        Ok(RunOutcome {
            text,
            steps: self.steps.clone(),
            messages: self.history.clone(),
        })
    }

    /// describe 阶段：产出本 step 发给模型引擎的请求
    fn prepare_step(&mut self, step: usize) -> Result<StepRequest, PromptError> {
        self.signals.borrow_mut().clear();
        self.modifier.clear();

        let replay = self.described;
        if replay {
            self.tracker.reset();
            self.effects.clear_registered();
        }
        {
            let mut scope = Scope {
                step,
                first_pass: !replay,
                state: &self.state,
                tracker: &mut self.tracker,
                effects: &mut self.effects,
                signals: &self.signals,
                variables: &mut self.variables,
                systems: &mut self.systems,
                tools: &mut self.tools,
                history: &mut self.history,
            };
            (self.describe)(&mut scope)?;
        }
        self.described = true;

        if replay {
            let pruned = self
                .tracker
                .reconcile(&mut self.variables, &mut self.systems, &mut self.tools);
            for (class, name) in pruned {
                send_event(
                    &self.event_tx,
                    ConversationEvent::DefinitionPruned { class, name },
                );
            }
        }

        let context = EffectContext {
            step,
            messages: &self.history,
            variables: &self.variables,
            systems: &self.systems,
            tools: &self.tools,
            last_tool_call: self.last_tool_call.as_ref(),
        };
        let ran = self.effects.process(&context, &mut self.modifier)?;
        for effect in ran {
            send_event(&self.event_tx, ConversationEvent::EffectRan { step, effect });
        }

        let filters = {
            let signals = self.signals.borrow();
            ActiveFilters {
                tools: active_filter(
                    KindClass::Tools,
                    self.tools.keys(),
                    &signals,
                    self.modifier.tools(),
                ),
                systems: active_filter(
                    KindClass::Systems,
                    self.systems.keys(),
                    &signals,
                    self.modifier.systems(),
                ),
                variables: active_filter(
                    KindClass::Variables,
                    self.variables.keys(),
                    &signals,
                    self.modifier.variables(),
                ),
            }
        };

        let mut messages = if self.modifier.messages().is_empty() {
            self.history.clone()
        } else {
            self.modifier.messages().to_vec()
        };
        if let Some(reminder) = self.signals.borrow_mut().take_reminders() {
            messages.push(Message::assistant(reminder));
        }

        let system_prompt = render_system_prompt(
            &self.systems,
            &self.variables,
            filters.systems.as_deref(),
            filters.variables.as_deref(),
        )?;

        Ok(StepRequest {
            step,
            system_prompt,
            messages,
            tools: self.tools.values().map(ToolDefinition::spec).collect(),
            active_tools: filters.tools.map_or(ActiveTools::All, ActiveTools::Only),
        })
    }

    /// dispatch 阶段：执行工具调用、写回历史并记录 step；返回是否继续下一 step
    async fn dispatch_step(&mut self, request: StepRequest, output: StepOutput) -> bool {
        let step = request.step;
        if !output.text.is_empty() || !output.tool_calls.is_empty() {
            self.history.push(Message::assistant_with_calls(
                output.text.clone(),
                output.tool_calls.clone(),
            ));
        }

        let parent = ParentContext {
            llm: self.llm.clone(),
            options: self.options.clone(),
        };
        let mut tool_results = Vec::with_capacity(output.tool_calls.len());
        for call in &output.tool_calls {
            send_event(
                &self.event_tx,
                ConversationEvent::ToolCall {
                    tool: call.name.clone(),
                    args: call.args.clone(),
                },
            );
            let definition = self
                .tools
                .get(&call.name)
                .filter(|_| request.active_tools.allows(&call.name))
                .cloned();
            let invocation = match definition {
                Some(def) => def.invoke(call.args.clone(), &parent).await,
                None => Invocation::error(PromptError::UnknownTool(call.name.clone()).to_string()),
            };
            send_event(
                &self.event_tx,
                ConversationEvent::ToolResult {
                    tool: call.name.clone(),
                    ok: !invocation.is_error,
                },
            );

            let content = serde_json::to_string(&invocation.output).unwrap_or_default();
            self.history.push(Message::tool(call.id.clone(), content));
            self.last_tool_call = Some(ToolInvocation {
                name: call.name.clone(),
                args: call.args.clone(),
                output: invocation.output.clone(),
            });
            tool_results.push(ToolResultRecord {
                call_id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
                output: invocation.output,
                is_error: invocation.is_error,
                sub_results: invocation.sub_results,
            });
        }

        self.steps.push(StepRecord {
            index: step,
            input: StepInput {
                prompt: request.prompt_messages(),
                active_tools: request.active_tools,
            },
            output: StepOutputRecord {
                content: output.text,
                tool_calls: output.tool_calls.clone(),
                finish_reason: output.finish_reason.clone(),
            },
            tool_results,
            state: self.state.snapshot(),
        });
        send_event(
            &self.event_tx,
            ConversationEvent::StepFinished {
                step,
                finish_reason: output.finish_reason.clone(),
            },
        );

        output.finish_reason == FinishReason::ToolCalls && !output.tool_calls.is_empty()
    }

    /// 丢弃整个对话状态（含 effect 依赖快照），从头开始
    pub fn reset(&mut self) {
        self.state = StateStore::new();
        self.tracker.reset();
        self.effects.reset();
        self.signals.borrow_mut().clear();
        self.modifier.clear();
        self.variables.clear();
        self.systems.clear();
        self.tools.clear();
        self.history.clear();
        self.steps.clear();
        self.described = false;
        self.last_tool_call = None;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn messages(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn options(&self) -> &ConversationOptions {
        &self.options
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }

    pub fn system_names(&self) -> Vec<&str> {
        self.systems.keys().map(String::as_str).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// 当前 step 日志的压缩视图
    pub fn history(&self) -> CompressedHistory {
        compress(&self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use crate::memory::ToolCall;
    use serde_json::json;

    #[test]
    fn test_build_requires_describe() {
        let err = Conversation::builder(Arc::new(MockLlmClient)).build().err().unwrap();
        assert!(matches!(err, PromptError::Config(_)));

        let err = Conversation::builder(Arc::new(MockLlmClient))
            .describe(|_| Ok(()))
            .max_steps(0)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PromptError::Config(_)));
    }

    #[test]
    fn test_active_filter_precedence() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let shared = SharedSignals::default();
        assert_eq!(active_filter(KindClass::Tools, names.iter(), &shared.borrow(), &[]), None);

        crate::core::DefinitionHandle::new(crate::core::DefinitionKind::Tool, "b", shared.clone())
            .disable();
        let signals = shared.borrow();
        assert_eq!(
            active_filter(KindClass::Tools, names.iter(), &signals, &[]),
            Some(vec!["a".to_string(), "c".to_string()])
        );
        assert_eq!(active_filter(KindClass::Systems, names.iter(), &signals, &[]), None);
        // 显式修改覆盖 disable，重复名称只保留一次
        let mutated = vec!["b".to_string(), "b".to_string()];
        assert_eq!(
            active_filter(KindClass::Tools, names.iter(), &signals, &mutated),
            Some(vec!["b".to_string()])
        );
    }

    #[tokio::test]
    async fn test_mock_run_single_step() {
        let mut conv = Conversation::builder(Arc::new(MockLlmClient))
            .describe(|scope| {
                scope.prompt("hello");
                Ok(())
            })
            .build()
            .unwrap();
        let outcome = conv.run().await.unwrap();
        assert_eq!(outcome.text, "Echo from Mock: hello");
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_call_becomes_tool_error() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            StepOutput::tool_calls(vec![ToolCall::new("c1", "missing", json!({}))]),
            StepOutput::text("done"),
        ]));
        let mut conv = Conversation::builder(llm)
            .describe(|scope| {
                scope.prompt("go");
                Ok(())
            })
            .build()
            .unwrap();
        let outcome = conv.run().await.unwrap();
        assert_eq!(outcome.text, "done");
        let result = &outcome.steps[0].tool_results[0];
        assert!(result.is_error);
        assert_eq!(result.output, json!({"error": "Unknown tool: missing"}));
    }

    #[tokio::test]
    async fn test_step_limit_stops_tool_loop() {
        let call = || StepOutput::tool_calls(vec![ToolCall::new("c", "missing", json!({}))]);
        let llm = Arc::new(ScriptedLlmClient::new(vec![call(), call(), call()]));
        let mut conv = Conversation::builder(llm.clone())
            .describe(|scope| {
                scope.prompt("loop");
                Ok(())
            })
            .max_steps(2)
            .build()
            .unwrap();
        let outcome = conv.run().await.unwrap();
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_starts_fresh() {
        let mut conv = Conversation::builder(Arc::new(MockLlmClient))
            .describe(|scope| {
                let (count, set) = scope.state("runs", 0u32)?;
                set.set(count + 1)?;
                scope.prompt("hi");
                Ok(())
            })
            .build()
            .unwrap();
        conv.run().await.unwrap();
        assert_eq!(conv.state().get("runs"), Some(json!(1)));
        conv.reset();
        assert!(conv.state().is_empty());
        assert!(conv.messages().is_empty());
        conv.run().await.unwrap();
        assert_eq!(conv.state().get("runs"), Some(json!(1)));
        assert_eq!(conv.messages()[0], Message::user("hi"));
    }
}
