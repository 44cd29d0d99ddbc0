//! 模型传输抽象
//!
//! 所有后端（OpenAI 兼容 / 限流重试包装 / 脚本化）实现 ModelTransport：
//! send 一次完整请求（system + 历史 + 已翻译的工具 schema），返回一轮 assistant 输出。
//! 工具 schema 的形状翻译由引擎负责，传输层通过 tool_format 声明自己需要的形状。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::LlmError;
use crate::memory::{Message, ToolCall};

/// 传输层期望的工具定义形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFormat {
    /// `{"type":"function","function":{name, description, parameters}}`
    OpenAi,
    /// `{name, description, input_schema}`（引擎内部的规范形状）
    Canonical,
}

/// 单次请求
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    /// 已按 tool_format 翻译好的工具定义；为空表示本轮不提供工具
    pub tools: &'a [Value],
    /// 无工具时要求模型只输出 JSON 对象
    pub json_mode: bool,
}

/// 单次请求的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// 模型的一轮输出：自由文本，或一个以上工具调用（可同时带说明文字）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl AssistantTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = Usage {
            prompt_tokens,
            completion_tokens,
        };
        self
    }
}

/// 模型传输 trait
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn send(&self, request: ChatRequest<'_>) -> Result<AssistantTurn, LlmError>;

    fn tool_format(&self) -> ToolFormat {
        ToolFormat::OpenAi
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
