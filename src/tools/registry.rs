//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按注册顺序保存；
//! ToolDispatcher 在调用时加超时、预算与审计日志。工具返回文本或有序图片序列两种结果之一。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::schema::ToolSpec;

/// 一组有序截图切片（同一页面自上而下）
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSequence {
    /// 来源（通常是页面 URL）
    pub source: String,
    /// base64 编码的 JPEG，每张约一个视口高度
    pub tiles: Vec<String>,
}

/// 工具结果：纯文本，或图片序列（仅视觉阶段使用）
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Text(String),
    Images(ImageSequence),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self {
        ToolResult::Text(s.into())
    }

    /// 用于事件 / 日志的简短预览
    pub fn preview(&self, max_chars: usize) -> String {
        match self {
            ToolResult::Text(s) => {
                if s.chars().count() > max_chars {
                    format!("{}...", s.chars().take(max_chars).collect::<String>())
                } else {
                    s.clone()
                }
            }
            ToolResult::Images(seq) => format!("[{} image(s) from {}]", seq.tiles.len(), seq.source),
        }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 为给模型看的错误说明
    async fn execute(&self, args: Value) -> Result<ToolResult, String>;
}

/// 工具注册表：按注册顺序保存 Arc<dyn Tool>，同名后注册者覆盖
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 规范形状的工具定义（注册顺序）
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: Some(t.parameters_schema()),
            })
            .collect()
    }
}
