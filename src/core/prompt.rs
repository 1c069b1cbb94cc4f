//! system prompt 拼装
//!
//! 活动 system 段依声明顺序逐个包成 `<name>…</name>`；若至少有一个活动变量，再追加 `<variables>` 块，
//! 每个变量包成 `<name>\n…\n</name>`（文本变量原样输出，结构化变量序列化为 YAML）。

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::core::PromptError;

/// 变量值：纯文本，或结构化数据
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Variable {
    Text(String),
    Data(Value),
}

impl Variable {
    /// 渲染为插入 `<variables>` 块的正文
    pub fn render(&self) -> Result<String, PromptError> {
        match self {
            Variable::Text(text) => Ok(text.clone()),
            Variable::Data(value) => {
                let yaml = serde_yaml::to_string(value)?;
                Ok(yaml.trim_end().to_string())
            }
        }
    }
}

fn is_active(filter: Option<&[String]>, name: &str) -> bool {
    filter.map_or(true, |names| names.iter().any(|n| n == name))
}

/// 按活动子集拼装 system prompt；没有任何活动 system 段与变量时返回 None
pub fn render_system_prompt(
    systems: &IndexMap<String, String>,
    variables: &IndexMap<String, Variable>,
    active_systems: Option<&[String]>,
    active_variables: Option<&[String]>,
) -> Result<Option<String>, PromptError> {
    let mut parts: Vec<String> = systems
        .iter()
        .filter(|(name, _)| is_active(active_systems, name))
        .map(|(name, text)| format!("<{name}>{text}</{name}>"))
        .collect();

    let mut rendered_vars = Vec::new();
    for (name, variable) in variables {
        if is_active(active_variables, name) {
            rendered_vars.push(format!("<{name}>\n{}\n</{name}>", variable.render()?));
        }
    }
    if !rendered_vars.is_empty() {
        parts.push(format!("<variables>\n{}\n</variables>", rendered_vars.join("\n")));
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("\n\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_sections_and_variables() {
        let mut systems = IndexMap::new();
        systems.insert("role".to_string(), "X".to_string());
        let mut variables = IndexMap::new();
        variables.insert("name".to_string(), Variable::Text("Alice".into()));

        let prompt = render_system_prompt(&systems, &variables, None, None)
            .unwrap()
            .unwrap();
        assert_eq!(
            prompt,
            "<role>X</role>\n\n<variables>\n<name>\nAlice\n</name>\n</variables>"
        );
    }

    #[test]
    fn test_declaration_order_not_alphabetical() {
        let mut systems = IndexMap::new();
        systems.insert("zeta".to_string(), "z".to_string());
        systems.insert("alpha".to_string(), "a".to_string());
        let prompt = render_system_prompt(&systems, &IndexMap::new(), None, None)
            .unwrap()
            .unwrap();
        assert!(prompt.find("<zeta>").unwrap() < prompt.find("<alpha>").unwrap());
        assert!(!prompt.contains("<variables>"));
    }

    #[test]
    fn test_data_variable_as_yaml() {
        let mut variables = IndexMap::new();
        variables.insert(
            "profile".to_string(),
            Variable::Data(json!({"age": 3, "tags": ["a"]})),
        );
        let prompt = render_system_prompt(&IndexMap::new(), &variables, None, None)
            .unwrap()
            .unwrap();
        assert!(prompt.contains("<profile>\nage: 3\ntags:\n- a\n</profile>"));
    }

    #[test]
    fn test_data_variable_keeps_key_order() {
        let mut variables = IndexMap::new();
        variables.insert(
            "p".to_string(),
            Variable::Data(json!({"zeta": 1, "alpha": 2})),
        );
        let prompt = render_system_prompt(&IndexMap::new(), &variables, None, None)
            .unwrap()
            .unwrap();
        assert!(prompt.contains("<p>\nzeta: 1\nalpha: 2\n</p>"));
    }

    #[test]
    fn test_filters_applied() {
        let mut systems = IndexMap::new();
        systems.insert("a".to_string(), "1".to_string());
        systems.insert("b".to_string(), "2".to_string());
        let mut variables = IndexMap::new();
        variables.insert("v".to_string(), Variable::Text("x".into()));

        let only_b = vec!["b".to_string()];
        let none: Vec<String> = Vec::new();
        let prompt = render_system_prompt(&systems, &variables, Some(&only_b), Some(&none))
            .unwrap()
            .unwrap();
        assert_eq!(prompt, "<b>2</b>");

        let empty = render_system_prompt(&IndexMap::new(), &IndexMap::new(), None, None).unwrap();
        assert!(empty.is_none());
    }
}
