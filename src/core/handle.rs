//! 定义句柄：`value()` 返回占位符 `<name>`，`remind()` / `disable()` 作用于当前 step
//!
//! 句柄只记录 (kind, name)，并共享编排器的 StepSignals；跨轮次按名称比较相等，
//! 旧轮次捕获的句柄在新一轮仍然有效。

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::core::definitions::{DefinitionKind, KindClass};

/// 一个 step 内由句柄产生的信号：待追加的提醒、被禁用的定义
#[derive(Debug, Default)]
pub struct StepSignals {
    reminders: Vec<String>,
    disabled: HashSet<(KindClass, String)>,
}

impl StepSignals {
    /// 取出并清空本 step 的提醒，合成一条 assistant 文本
    pub fn take_reminders(&mut self) -> Option<String> {
        if self.reminders.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.reminders).join("\n"))
    }

    pub fn is_disabled(&self, class: KindClass, name: &str) -> bool {
        self.disabled.contains(&(class, name.to_string()))
    }

    pub fn has_disabled(&self, class: KindClass) -> bool {
        self.disabled.iter().any(|(c, _)| *c == class)
    }

    /// step 开始时清空禁用集合（提醒在发送时已清空）
    pub fn clear(&mut self) {
        self.reminders.clear();
        self.disabled.clear();
    }
}

pub type SharedSignals = Rc<RefCell<StepSignals>>;

/// 声明调用返回的轻量句柄
#[derive(Clone, Debug)]
pub struct DefinitionHandle {
    kind: DefinitionKind,
    name: String,
    signals: SharedSignals,
}

impl DefinitionHandle {
    pub(crate) fn new(
        kind: DefinitionKind,
        name: impl Into<String>,
        signals: SharedSignals,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            signals,
        }
    }

    pub fn kind(&self) -> DefinitionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 插入提示词时使用的占位符
    pub fn value(&self) -> String {
        format!("<{}>", self.name)
    }

    /// 排队一条提醒，本 step 作为 assistant 消息追加一次后清除
    pub fn remind(&self) {
        let line = match self.kind {
            DefinitionKind::Variable | DefinitionKind::DataVariable => {
                format!("Remember to use {} from the variables block.", self.value())
            }
            DefinitionKind::SystemSection => {
                format!("Remember to follow the {} instructions.", self.value())
            }
            DefinitionKind::Tool => format!("Remember that the {} tool is available.", self.name),
            DefinitionKind::Agent => format!("Remember that the {} agent is available.", self.name),
        };
        self.signals.borrow_mut().reminders.push(line);
    }

    /// 将该定义从当前 step 的活动子集中排除
    pub fn disable(&self) {
        self.signals
            .borrow_mut()
            .disabled
            .insert((self.kind.class(), self.name.clone()));
    }
}

impl PartialEq for DefinitionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.kind.class() == other.kind.class() && self.name == other.name
    }
}

impl Eq for DefinitionHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_placeholder() {
        let signals = SharedSignals::default();
        let handle = DefinitionHandle::new(DefinitionKind::Variable, "name", signals);
        assert_eq!(handle.value(), "<name>");
    }

    #[test]
    fn test_remind_flushes_once() {
        let signals = SharedSignals::default();
        let handle = DefinitionHandle::new(DefinitionKind::SystemSection, "role", signals.clone());
        handle.remind();
        handle.remind();
        let text = signals.borrow_mut().take_reminders().unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("<role>"));
        assert!(signals.borrow_mut().take_reminders().is_none());
    }

    #[test]
    fn test_disable_by_class() {
        let signals = SharedSignals::default();
        DefinitionHandle::new(DefinitionKind::Agent, "helper", signals.clone()).disable();
        let s = signals.borrow();
        assert!(s.is_disabled(KindClass::Tools, "helper"));
        assert!(s.has_disabled(KindClass::Tools));
        assert!(!s.has_disabled(KindClass::Variables));
    }

    #[test]
    fn test_handles_equal_by_name_across_kinds_in_same_class() {
        let signals = SharedSignals::default();
        let a = DefinitionHandle::new(DefinitionKind::Variable, "x", signals.clone());
        let b = DefinitionHandle::new(DefinitionKind::DataVariable, "x", signals.clone());
        let c = DefinitionHandle::new(DefinitionKind::Tool, "x", signals);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
