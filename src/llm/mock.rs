//! 脚本化传输（测试与 --dry-run，无需 API）
//!
//! 按 system prompt 中的标记路由到不同脚本；每个脚本是按序消费的步骤队列，耗尽后重复最后一步。
//! 记录收到的每个请求，便于断言重试次数、工具是否撤回、消息顺序等。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::LlmError;
use crate::llm::{AssistantTurn, ChatRequest, ModelTransport, ToolFormat};
use crate::memory::Message;

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(AssistantTurn),
    Fail(LlmError),
    /// 永不返回（用于取消测试）
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    steps: Vec<ScriptStep>,
    cursor: usize,
    delay: Option<Duration>,
}

impl Script {
    fn next(&mut self) -> Option<ScriptStep> {
        let step = self.steps.get(self.cursor).or_else(|| self.steps.last())?.clone();
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
        Some(step)
    }
}

/// 被记录下来的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub route: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub json_mode: bool,
}

/// 默认路由名（未命中任何标记时）
const DEFAULT_ROUTE: &str = "*";

#[derive(Default)]
pub struct ScriptedTransport {
    /// (标记, 路由名) 按注册顺序匹配
    markers: Vec<String>,
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<RecordedRequest>>,
    format: Option<ToolFormat>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// system prompt 包含 marker 时使用该脚本
    pub fn with_route(mut self, marker: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        let marker = marker.into();
        self.insert_script(marker.clone(), steps);
        self.markers.push(marker);
        self
    }

    pub fn with_default_script(mut self, steps: Vec<ScriptStep>) -> Self {
        self.insert_script(DEFAULT_ROUTE.to_string(), steps);
        self
    }

    /// 为某条路由的每次响应加固定延迟（模拟模型耗时）
    pub fn with_delay(self, marker: &str, delay: Duration) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(marker.to_string()).or_default().delay = Some(delay);
        }
        self
    }

    pub fn with_tool_format(mut self, format: ToolFormat) -> Self {
        self.format = Some(format);
        self
    }

    fn insert_script(&mut self, route: String, steps: Vec<ScriptStep>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            let script = scripts.entry(route).or_default();
            script.steps = steps;
            script.cursor = 0;
        }
    }

    fn route_for(&self, system: &str) -> String {
        self.markers
            .iter()
            .find(|m| system.contains(m.as_str()))
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROUTE.to_string())
    }

    /// 到目前为止收到的全部请求
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 某条路由收到的请求
    pub fn requests_for(&self, marker: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.route == marker)
            .collect()
    }
}

fn tool_name(tool: &Value) -> Option<String> {
    tool.get("function")
        .and_then(|f| f.get("name"))
        .or_else(|| tool.get("name"))
        .and_then(|n| n.as_str())
        .map(String::from)
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn send(&self, request: ChatRequest<'_>) -> Result<AssistantTurn, LlmError> {
        let route = self.route_for(request.system);
        if let Ok(mut log) = self.requests.lock() {
            log.push(RecordedRequest {
                route: route.clone(),
                system: request.system.to_string(),
                messages: request.messages.to_vec(),
                tool_names: request.tools.iter().filter_map(tool_name).collect(),
                json_mode: request.json_mode,
            });
        }

        let (step, delay) = {
            let mut scripts = self
                .scripts
                .lock()
                .map_err(|_| LlmError::Api("script lock poisoned".into()))?;
            match scripts.get_mut(&route) {
                Some(script) => (script.next(), script.delay),
                None => (None, None),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match step {
            Some(ScriptStep::Reply(turn)) => Ok(turn),
            Some(ScriptStep::Fail(e)) => Err(e),
            Some(ScriptStep::Hang) => {
                std::future::pending::<()>().await;
                Err(LlmError::Api("unreachable".into()))
            }
            None => Err(LlmError::Api(format!("no script for route '{route}'"))),
        }
    }

    fn tool_format(&self) -> ToolFormat {
        self.format.unwrap_or(ToolFormat::OpenAi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req<'a>(system: &'a str, messages: &'a [Message]) -> ChatRequest<'a> {
        ChatRequest {
            system,
            messages,
            tools: &[],
            json_mode: false,
        }
    }

    #[tokio::test]
    async fn test_routes_by_marker_and_repeats_last_step() {
        let transport = ScriptedTransport::new()
            .with_route("Code Analysis", vec![ScriptStep::Reply(AssistantTurn::text("b"))])
            .with_default_script(vec![
                ScriptStep::Reply(AssistantTurn::text("first")),
                ScriptStep::Reply(AssistantTurn::text("second")),
            ]);
        let messages = vec![Message::user("go")];
        let b = transport.send(req("You are the Code Analysis agent", &messages)).await;
        assert_eq!(b.unwrap().text, "b");
        assert_eq!(transport.send(req("other", &messages)).await.unwrap().text, "first");
        assert_eq!(transport.send(req("other", &messages)).await.unwrap().text, "second");
        assert_eq!(transport.send(req("other", &messages)).await.unwrap().text, "second");
        assert_eq!(transport.requests_for("Code Analysis").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_route_errors() {
        let transport = ScriptedTransport::new();
        let messages: Vec<Message> = Vec::new();
        let err = transport.send(req("x", &messages)).await.unwrap_err();
        assert!(matches!(err, LlmError::Api(_)));
    }
}
