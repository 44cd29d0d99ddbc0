//! OpenAI 兼容 API 传输
//!
//! 通过 async_openai 的 bring-your-own-types 接口发送原始 JSON（可配置 base_url），
//! 以便携带工具定义、tool 回复与多段图片消息；错误按文本特征归类为限流 / 超长 / 网络 / API。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::LlmError;
use crate::llm::{AssistantTurn, ChatRequest, ModelTransport, ToolFormat, Usage};
use crate::memory::{ContentPart, Message, Role, ToolCall};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容传输：持有 Client 与 model 名
pub struct OpenAiTransport {
    client: Client<OpenAIConfig>,
    model: String,
    pub usage: TokenUsage,
}

impl OpenAiTransport {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        let mut client = Client::with_config(config);
        if let Ok(http) = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
        {
            client = client.with_http_client(http);
        }

        Self {
            client,
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn request_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system})];
        messages.extend(request.messages.iter().map(to_openai_message));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.to_vec());
            body["tool_choice"] = json!("auto");
        } else if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

fn to_openai_message(m: &Message) -> Value {
    match m.role {
        Role::System => json!({"role": "system", "content": m.content}),
        Role::User if !m.parts.is_empty() => {
            let parts: Vec<Value> = m
                .parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { data } => json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:image/jpeg;base64,{data}"), "detail": "low"},
                    }),
                })
                .collect();
            json!({"role": "user", "content": parts})
        }
        Role::User => json!({"role": "user", "content": m.content}),
        Role::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    })
                })
                .collect();
            let content = if m.content.is_empty() {
                Value::Null
            } else {
                Value::String(m.content.clone())
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Role::Assistant => json!({"role": "assistant", "content": m.content}),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.content,
        }),
    }
}

/// 按错误文本归类；限流的等待时长由 RetryingTransport 决定
pub fn classify_error(message: &str) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("context_length_exceeded")
        || lower.contains("request too large")
        || lower.contains("maximum context length")
    {
        LlmError::ContextTooLarge(message.to_string())
    } else if lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("429") {
        LlmError::RateLimited { retry_after_ms: 0 }
    } else if lower.contains("error sending request")
        || lower.contains("timed out")
        || lower.contains("connection")
    {
        LlmError::Network(message.to_string())
    } else {
        LlmError::Api(message.to_string())
    }
}

/// 解析 chat.completions 响应中的首个 choice
pub fn parse_response(response: &Value) -> Result<AssistantTurn, LlmError> {
    let message = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for (i, call) in calls.iter().enumerate() {
            let function = call
                .get("function")
                .ok_or_else(|| LlmError::InvalidResponse("tool call without function".into()))?;
            let name = function
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| LlmError::InvalidResponse("tool call without name".into()))?;
            let raw_args = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let arguments = serde_json::from_str(raw_args)
                .unwrap_or_else(|_| Value::String(raw_args.to_string()));
            let id = call
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("call_{i}"));
            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    let usage = response
        .get("usage")
        .map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(AssistantTurn {
        text,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl ModelTransport for OpenAiTransport {
    async fn send(&self, request: ChatRequest<'_>) -> Result<AssistantTurn, LlmError> {
        let body = self.request_body(&request);
        let response: Value = self
            .client
            .chat()
            .create_byot(body)
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        let turn = parse_response(&response)?;
        self.usage
            .add(turn.usage.prompt_tokens, turn.usage.completion_tokens);
        Ok(turn)
    }

    fn tool_format(&self) -> ToolFormat {
        ToolFormat::OpenAi
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
