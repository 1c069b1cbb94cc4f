//! StateStore：跨重执行存活的键值状态
//!
//! 每个对话只有一个 StateStore（由 Conversation 持有）；值以 serde_json::Value 保存，
//! 通过 `create_accessor` 得到「当前值 + setter」，首次调用的 initial 生效，之后忽略。
//! 单线程协作模型下共享所有权用 Rc<RefCell<..>>，不需要锁。

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::effects::Dep;
use crate::core::PromptError;

/// 对话级状态存储；Clone 得到的是同一份存储的另一个引用
#[derive(Clone, Debug, Default)]
pub struct StateStore {
    entries: Rc<RefCell<HashMap<String, Value>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.borrow_mut().insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// 取得 key 的当前值与 setter；key 不存在时先写入 initial
    pub fn create_accessor<T>(
        &self,
        key: &str,
        initial: T,
    ) -> Result<(T, StateSetter<T>), PromptError>
    where
        T: Serialize + DeserializeOwned,
    {
        if !self.has(key) {
            let value = to_state_value(key, &initial)?;
            self.set(key, value);
        }
        let setter = StateSetter {
            key: key.to_string(),
            store: self.clone(),
            _marker: PhantomData,
        };
        let current = setter.get()?;
        Ok((current, setter))
    }

    /// 全部状态的 JSON 快照（按 key 排序，便于比较）
    pub fn snapshot(&self) -> Value {
        let entries = self.entries.borrow();
        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();
        let map = keys
            .into_iter()
            .map(|k| (k.clone(), entries[k].clone()))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }
}

fn to_state_value<T: Serialize>(key: &str, value: &T) -> Result<Value, PromptError> {
    serde_json::to_value(value).map_err(|source| PromptError::State {
        key: key.to_string(),
        source,
    })
}

/// 与某个 key 绑定的 setter；写入同步生效，同一轮后续 effect 与下一轮 accessor 均可见
pub struct StateSetter<T> {
    key: String,
    store: StateStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StateSetter<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for StateSetter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSetter").field("key", &self.key).finish()
    }
}

impl<T> StateSetter<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 读取当前值
    pub fn get(&self) -> Result<T, PromptError> {
        let value = self.store.get(&self.key).unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|source| PromptError::State {
            key: self.key.clone(),
            source,
        })
    }

    pub fn set(&self, value: T) -> Result<(), PromptError> {
        let value = to_state_value(&self.key, &value)?;
        self.store.set(self.key.clone(), value);
        Ok(())
    }

    /// 基于旧值计算新值
    pub fn update(&self, f: impl FnOnce(T) -> T) -> Result<(), PromptError> {
        let prev = self.get()?;
        self.set(f(prev))
    }

    /// 作为 effect 依赖：比较时读取存储中的最新值，而不是创建依赖时的值
    pub fn dep(&self) -> Dep {
        let store = self.store.clone();
        let key = self.key.clone();
        Dep::live(move || store.get(&key).unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessor_first_initial_wins() {
        let store = StateStore::new();
        let (count, setter) = store.create_accessor("count", 0i64).unwrap();
        assert_eq!(count, 0);
        setter.set(5).unwrap();

        let (count, _) = store.create_accessor("count", 100i64).unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_setter_update_and_has() {
        let store = StateStore::new();
        assert!(!store.has("items"));
        let (_, setter) = store
            .create_accessor("items", Vec::<String>::new())
            .unwrap();
        setter
            .update(|mut v| {
                v.push("a".to_string());
                v
            })
            .unwrap();
        assert!(store.has("items"));
        assert_eq!(store.get("items"), Some(json!(["a"])));
    }

    #[test]
    fn test_clones_share_storage() {
        let store = StateStore::new();
        let other = store.clone();
        other.set("k", json!(1));
        assert_eq!(store.get("k"), Some(json!(1)));
        assert_eq!(store.snapshot(), json!({"k": 1}));
    }

    #[test]
    fn test_type_mismatch_is_state_error() {
        let store = StateStore::new();
        store.set("n", json!("not a number"));
        let err = store.create_accessor("n", 0i64).unwrap_err();
        assert!(matches!(err, PromptError::State { ref key, .. } if key == "n"));
    }

    #[test]
    fn test_live_dep_reads_latest_value() {
        let store = StateStore::new();
        let (_, setter) = store.create_accessor("x", 1).unwrap();
        let dep = setter.dep();
        assert_eq!(dep.resolve(), json!(1));
        setter.set(2).unwrap();
        assert_eq!(dep.resolve(), json!(2));
    }
}
