//! 工具定义的形状翻译
//!
//! 引擎内部只有一种规范形状 `{name, description, input_schema}`；发送前按传输层要求翻译。
//! 翻译是纯函数、保持顺序，input_schema 原样搬运（required / enum / 嵌套都不丢）。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::llm::ToolFormat;

/// 规范形状的工具定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolSpec {
    /// 缺省 schema 视为无参数对象
    pub fn schema_or_empty(&self) -> Value {
        self.input_schema.clone().unwrap_or_else(empty_object_schema)
    }

    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.schema_or_empty(),
            }
        })
    }

    pub fn to_canonical(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.schema_or_empty(),
        })
    }

    /// OpenAI 形状逆向还原；形状不符返回 None
    pub fn from_openai(value: &Value) -> Option<Self> {
        let function = value.get("function")?;
        Some(Self {
            name: function.get("name")?.as_str()?.to_string(),
            description: function
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string(),
            input_schema: function.get("parameters").cloned(),
        })
    }
}

/// 按目标形状翻译一组工具定义，输出顺序与输入一致
pub fn translate_tools(specs: &[ToolSpec], format: ToolFormat) -> Vec<Value> {
    specs
        .iter()
        .map(|spec| match format {
            ToolFormat::OpenAi => spec.to_openai(),
            ToolFormat::Canonical => spec.to_canonical(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, schema: Option<Value>) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: schema,
        }
    }

    #[test]
    fn test_translate_preserves_order_and_constraints() {
        let nested = json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "mode": {"type": "string", "enum": ["text", "links"]},
                "opts": {"type": "object", "properties": {"depth": {"type": "integer"}}, "required": ["depth"]}
            },
            "required": ["url"]
        });
        let specs = vec![spec("browse_page", Some(nested.clone())), spec("get_tree", None), spec("alpha", None)];
        let out = translate_tools(&specs, ToolFormat::OpenAi);
        let names: Vec<&str> = out
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["browse_page", "get_tree", "alpha"]);
        assert_eq!(out[0]["function"]["parameters"], nested);
        assert_eq!(out[1]["function"]["parameters"], json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn test_openai_round_trip_is_lossless() {
        let original = spec("search_code", Some(json!({"type": "object", "required": ["pattern"]})));
        let back = ToolSpec::from_openai(&original.to_openai()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_canonical_shape() {
        let out = translate_tools(&[spec("read_file", None)], ToolFormat::Canonical);
        assert_eq!(out[0]["name"], "read_file");
        assert!(out[0].get("input_schema").is_some());
        assert!(out[0].get("function").is_none());
    }
}
