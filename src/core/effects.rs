//! EffectsManager：依赖驱动的副作用回调
//!
//! 每轮描述函数重新注册 effect（id = 本轮注册顺序）；上一轮的依赖快照按 id 保存在旁路 map 中，
//! 因此重新注册后仍能比较。判定规则：
//! - 没有依赖列表：每个 step 都运行
//! - 该 id 尚无快照：运行
//! - 否则逐项严格相等比较（长度不同也算变化），有差异才运行
//!
//! 回调通过 StepModifier 追加本 step 的 messages / tools / systems / variables 修改。

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::core::prompt::Variable;
use crate::core::PromptError;
use crate::memory::Message;
use crate::tools::ToolDefinition;

/// effect 依赖项：固定值，或比较时才读取的「装箱值」（如 StateSetter::dep）
#[derive(Clone)]
pub enum Dep {
    Value(Value),
    Live(Rc<dyn Fn() -> Value>),
}

impl Dep {
    /// 序列化失败时退化为 null
    pub fn value(v: impl Serialize) -> Self {
        Dep::Value(serde_json::to_value(v).unwrap_or(Value::Null))
    }

    pub fn live(read: impl Fn() -> Value + 'static) -> Self {
        Dep::Live(Rc::new(read))
    }

    /// 解析为用于比较的值：装箱值取其当前值
    pub fn resolve(&self) -> Value {
        match self {
            Dep::Value(v) => v.clone(),
            Dep::Live(read) => read(),
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dep::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Dep::Live(_) => f.write_str("Live(..)"),
        }
    }
}

impl From<Value> for Dep {
    fn from(v: Value) -> Self {
        Dep::Value(v)
    }
}

/// 最近一次工具调用（名称、参数、输出）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
    pub output: Value,
}

/// effect 回调可见的只读上下文
pub struct EffectContext<'a> {
    pub step: usize,
    pub messages: &'a [Message],
    pub variables: &'a IndexMap<String, Variable>,
    pub systems: &'a IndexMap<String, String>,
    pub tools: &'a IndexMap<String, ToolDefinition>,
    pub last_tool_call: Option<&'a ToolInvocation>,
}

impl EffectContext<'_> {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn system_names(&self) -> Vec<&str> {
        self.systems.keys().map(String::as_str).collect()
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }
}

/// 一个 step 内 effect 请求的修改（StepModification 累加器）
#[derive(Clone, Debug, Default)]
pub struct StepModifier {
    messages: Vec<Message>,
    tools: Vec<String>,
    systems: Vec<String>,
    variables: Vec<String>,
}

impl StepModifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 任一消息修改都会整体替换本 step 的消息列表
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_tool(&mut self, name: impl Into<String>) {
        self.tools.push(name.into());
    }

    pub fn push_system(&mut self, name: impl Into<String>) {
        self.systems.push(name.into());
    }

    pub fn push_variable(&mut self, name: impl Into<String>) {
        self.variables.push(name.into());
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn systems(&self) -> &[String] {
        &self.systems
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.tools.is_empty()
            && self.systems.is_empty()
            && self.variables.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.tools.clear();
        self.systems.clear();
        self.variables.clear();
    }
}

pub type EffectFn =
    Box<dyn FnMut(&EffectContext<'_>, &mut StepModifier) -> Result<(), PromptError>>;

struct Effect {
    callback: EffectFn,
    dependencies: Option<Vec<Dep>>,
}

/// effect 注册表 + 依赖快照
#[derive(Default)]
pub struct EffectsManager {
    registered: Vec<Effect>,
    snapshots: HashMap<usize, Vec<Value>>,
}

impl EffectsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 effect，返回本轮 id（注册顺序）
    pub fn register(&mut self, callback: EffectFn, dependencies: Option<Vec<Dep>>) -> usize {
        self.registered.push(Effect {
            callback,
            dependencies,
        });
        self.registered.len() - 1
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// 依次判定并运行本轮 effect，返回实际运行的 id；回调错误直接向上传播
    pub fn process(
        &mut self,
        context: &EffectContext<'_>,
        modifier: &mut StepModifier,
    ) -> Result<Vec<usize>, PromptError> {
        let mut ran = Vec::new();
        for (id, effect) in self.registered.iter_mut().enumerate() {
            let fresh: Option<Vec<Value>> = effect
                .dependencies
                .as_ref()
                .map(|deps| deps.iter().map(Dep::resolve).collect());

            let should_run = match (&fresh, self.snapshots.get(&id)) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(fresh), Some(prev)) => fresh != prev,
            };
            if !should_run {
                continue;
            }

            tracing::debug!(effect = id, step = context.step, "effect run");
            (effect.callback)(context, modifier)?;
            if let Some(fresh) = fresh {
                self.snapshots.insert(id, fresh);
            }
            ran.push(id);
        }
        Ok(ran)
    }

    /// 重执行之间调用：只清空已注册回调，保留依赖快照
    pub fn clear_registered(&mut self) {
        self.registered.clear();
    }

    /// 整个对话丢弃时调用：连同依赖快照一起清空
    pub fn reset(&mut self) {
        self.registered.clear();
        self.snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use serde_json::json;

    struct Fixture {
        variables: IndexMap<String, Variable>,
        systems: IndexMap<String, String>,
        tools: IndexMap<String, ToolDefinition>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                variables: IndexMap::new(),
                systems: IndexMap::new(),
                tools: IndexMap::new(),
            }
        }

        fn context(&self, step: usize) -> EffectContext<'_> {
            EffectContext {
                step,
                messages: &[],
                variables: &self.variables,
                systems: &self.systems,
                tools: &self.tools,
                last_tool_call: None,
            }
        }
    }

    fn counting(counter: &Rc<Cell<usize>>) -> EffectFn {
        let counter = counter.clone();
        Box::new(move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        })
    }

    /// 模拟一轮：清空注册 -> 重新注册 -> process
    fn pass(manager: &mut EffectsManager, fixture: &Fixture, cb: EffectFn, deps: Option<Vec<Dep>>) {
        manager.clear_registered();
        manager.register(cb, deps);
        let mut modifier = StepModifier::new();
        manager.process(&fixture.context(0), &mut modifier).unwrap();
    }

    #[test]
    fn test_dependency_gating() {
        let fixture = Fixture::new();
        let mut manager = EffectsManager::new();
        let runs = Rc::new(Cell::new(0));

        pass(&mut manager, &fixture, counting(&runs), Some(vec![Dep::value(1)]));
        assert_eq!(runs.get(), 1);
        pass(&mut manager, &fixture, counting(&runs), Some(vec![Dep::value(1)]));
        assert_eq!(runs.get(), 1);
        pass(&mut manager, &fixture, counting(&runs), Some(vec![Dep::value(2)]));
        assert_eq!(runs.get(), 2);
        pass(&mut manager, &fixture, counting(&runs), Some(vec![Dep::value(2)]));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_no_dependencies_always_runs() {
        let fixture = Fixture::new();
        let mut manager = EffectsManager::new();
        let runs = Rc::new(Cell::new(0));
        for _ in 0..3 {
            pass(&mut manager, &fixture, counting(&runs), None);
        }
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_length_change_triggers_run() {
        let fixture = Fixture::new();
        let mut manager = EffectsManager::new();
        let runs = Rc::new(Cell::new(0));
        pass(&mut manager, &fixture, counting(&runs), Some(vec![Dep::value("a")]));
        pass(
            &mut manager,
            &fixture,
            counting(&runs),
            Some(vec![Dep::value("a"), Dep::value("b")]),
        );
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_empty_dependencies_run_once() {
        let fixture = Fixture::new();
        let mut manager = EffectsManager::new();
        let runs = Rc::new(Cell::new(0));
        pass(&mut manager, &fixture, counting(&runs), Some(Vec::new()));
        pass(&mut manager, &fixture, counting(&runs), Some(Vec::new()));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_reset_forgets_snapshots() {
        let fixture = Fixture::new();
        let mut manager = EffectsManager::new();
        let runs = Rc::new(Cell::new(0));
        pass(&mut manager, &fixture, counting(&runs), Some(vec![Dep::value(1)]));
        manager.reset();
        assert!(manager.is_empty());
        pass(&mut manager, &fixture, counting(&runs), Some(vec![Dep::value(1)]));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_live_dep_unwraps_current_value() {
        let fixture = Fixture::new();
        let mut manager = EffectsManager::new();
        let runs = Rc::new(Cell::new(0));
        let cell = Rc::new(Cell::new(1));
        let live = {
            let cell = cell.clone();
            Dep::live(move || json!(cell.get()))
        };
        pass(&mut manager, &fixture, counting(&runs), Some(vec![live.clone()]));
        pass(&mut manager, &fixture, counting(&runs), Some(vec![live.clone()]));
        assert_eq!(runs.get(), 1);
        cell.set(2);
        pass(&mut manager, &fixture, counting(&runs), Some(vec![live]));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_modifier_collects_and_error_propagates() {
        let fixture = Fixture::new();
        let mut manager = EffectsManager::new();
        manager.register(
            Box::new(|ctx, m| {
                m.push_tool("search");
                m.push_message(Message::user(format!("step {}", ctx.step)));
                Ok(())
            }),
            None,
        );
        manager.register(Box::new(|_, _| Err(PromptError::effect("boom"))), None);

        let mut modifier = StepModifier::new();
        let err = manager.process(&fixture.context(4), &mut modifier).unwrap_err();
        assert!(matches!(err, PromptError::Effect(_)));
        assert_eq!(modifier.tools().to_vec(), vec!["search".to_string()]);
        assert_eq!(modifier.messages()[0].content, "step 4");
    }
}
