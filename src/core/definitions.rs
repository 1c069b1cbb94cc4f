//! DefinitionTracker：记录本轮描述函数声明过哪些定义，并删除未再声明的旧定义
//!
//! 命名空间按 KindClass 划分：variable 与 data-variable 共用变量命名空间，tool 与 agent 共用工具命名空间。

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 定义种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefinitionKind {
    Variable,
    DataVariable,
    SystemSection,
    Tool,
    Agent,
}

/// 定义所在的命名空间（对应三个活动集合）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindClass {
    Variables,
    Systems,
    Tools,
}

impl DefinitionKind {
    pub fn class(self) -> KindClass {
        match self {
            DefinitionKind::Variable | DefinitionKind::DataVariable => KindClass::Variables,
            DefinitionKind::SystemSection => KindClass::Systems,
            DefinitionKind::Tool | DefinitionKind::Agent => KindClass::Tools,
        }
    }
}

/// 本轮已声明（seen）的定义
#[derive(Debug, Default)]
pub struct DefinitionTracker {
    seen: HashSet<(KindClass, String)>,
}

impl DefinitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, kind: DefinitionKind, name: &str) {
        self.seen.insert((kind.class(), name.to_string()));
    }

    pub fn is_seen(&self, kind: DefinitionKind, name: &str) -> bool {
        self.seen.contains(&(kind.class(), name.to_string()))
    }

    /// 每次重执行前清空标记
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// 就地删除三个活动集合中本轮未声明的条目，返回被删除的 (命名空间, 名称)
    pub fn reconcile<V, S, T>(
        &self,
        variables: &mut IndexMap<String, V>,
        systems: &mut IndexMap<String, S>,
        tools: &mut IndexMap<String, T>,
    ) -> Vec<(KindClass, String)> {
        let mut pruned = Vec::new();
        self.prune(KindClass::Variables, variables, &mut pruned);
        self.prune(KindClass::Systems, systems, &mut pruned);
        self.prune(KindClass::Tools, tools, &mut pruned);
        pruned
    }

    fn prune<V>(
        &self,
        class: KindClass,
        live: &mut IndexMap<String, V>,
        pruned: &mut Vec<(KindClass, String)>,
    ) {
        live.retain(|name, _| {
            let keep = self.seen.contains(&(class, name.clone()));
            if !keep {
                tracing::debug!(?class, name = %name, "definition pruned");
                pruned.push((class, name.clone()));
            }
            keep
        });
    }
}
