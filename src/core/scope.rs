//! Scope：描述函数每轮拿到的声明入口
//!
//! 每个声明调用都会在 DefinitionTracker 中打标记，并写入（或更新）对应的活动集合；
//! 返回的 DefinitionHandle 在各轮之间按名称保持稳定。

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::agent::AgentDefinition;
use crate::core::definitions::{DefinitionKind, DefinitionTracker};
use crate::core::effects::{Dep, EffectContext, EffectsManager, StepModifier};
use crate::core::handle::{DefinitionHandle, SharedSignals};
use crate::core::prompt::Variable;
use crate::core::state::{StateSetter, StateStore};
use crate::core::PromptError;
use crate::memory::Message;
use crate::tools::ToolDefinition;

pub struct Scope<'a> {
    pub(crate) step: usize,
    pub(crate) first_pass: bool,
    pub(crate) state: &'a StateStore,
    pub(crate) tracker: &'a mut DefinitionTracker,
    pub(crate) effects: &'a mut EffectsManager,
    pub(crate) signals: &'a SharedSignals,
    pub(crate) variables: &'a mut IndexMap<String, Variable>,
    pub(crate) systems: &'a mut IndexMap<String, String>,
    pub(crate) tools: &'a mut IndexMap<String, ToolDefinition>,
    pub(crate) history: &'a mut Vec<Message>,
}

impl Scope<'_> {
    /// 当前 step（从 0 开始）
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn is_first_pass(&self) -> bool {
        self.first_pass
    }

    fn handle(&mut self, kind: DefinitionKind, name: &str) -> DefinitionHandle {
        self.tracker.mark(kind, name);
        DefinitionHandle::new(kind, name, self.signals.clone())
    }

    /// 入口用户消息：只在第一轮生效，之后的重执行为 no-op
    pub fn prompt(&mut self, text: impl Into<String>) {
        if self.first_pass {
            self.history.push(Message::user(text));
        }
    }

    /// 文本变量，渲染进 `<variables>` 块
    pub fn variable(&mut self, name: &str, value: impl Into<String>) -> DefinitionHandle {
        self.variables
            .insert(name.to_string(), Variable::Text(value.into()));
        self.handle(DefinitionKind::Variable, name)
    }

    /// 结构化变量，渲染时序列化为 YAML
    pub fn data(
        &mut self,
        name: &str,
        value: impl Serialize,
    ) -> Result<DefinitionHandle, PromptError> {
        let value =
            serde_json::to_value(value).map_err(|e| PromptError::Serialization(e.to_string()))?;
        self.variables.insert(name.to_string(), Variable::Data(value));
        Ok(self.handle(DefinitionKind::DataVariable, name))
    }

    /// system prompt 段，渲染为 `<name>…</name>`
    pub fn system(&mut self, name: &str, text: impl Into<String>) -> DefinitionHandle {
        self.systems.insert(name.to_string(), text.into());
        self.handle(DefinitionKind::SystemSection, name)
    }

    /// 工具（单个或组合）；参数 schema 在此编译，非法 schema 直接报错
    pub fn tool(
        &mut self,
        mut definition: ToolDefinition,
    ) -> Result<DefinitionHandle, PromptError> {
        definition.compile()?;
        let name = definition.name().to_string();
        self.tools.insert(name.clone(), definition);
        Ok(self.handle(DefinitionKind::Tool, &name))
    }

    /// 智能体（单个或组合），与工具共享命名空间
    pub fn agent(&mut self, definition: AgentDefinition) -> Result<DefinitionHandle, PromptError> {
        let mut tool = definition.into_tool();
        tool.compile()?;
        let name = tool.name().to_string();
        self.tools.insert(name.clone(), tool);
        Ok(self.handle(DefinitionKind::Agent, &name))
    }

    /// 注册 effect；dependencies 为 None 时每个 step 都运行
    pub fn effect<F>(&mut self, callback: F, dependencies: Option<Vec<Dep>>) -> usize
    where
        F: FnMut(&EffectContext<'_>, &mut StepModifier) -> Result<(), PromptError> + 'static,
    {
        self.effects.register(Box::new(callback), dependencies)
    }

    /// 跨轮次持久的状态；initial 只在 key 首次出现时生效
    pub fn state<T>(&mut self, key: &str, initial: T) -> Result<(T, StateSetter<T>), PromptError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.state.create_accessor(key, initial)
    }
}
