//! 工具分发器
//!
//! 持有 ToolRegistry、全局超时与预算守卫。dispatch(call) 的规则：
//! - 未注册的工具名：返回 `AgentError::UnknownTool`，由对话循环转为错误回复；
//! - 挂了预算且已耗尽：直接返回预算提示文本，不调用工具，不算错误；
//! - 工具返回 Err、panic 或超时：转为 `Error: ...` 文本结果，让模型自行修正。
//!
//! 每次调用输出结构化审计日志（JSON）。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::time::timeout;

use crate::core::{AgentError, RecoveryEngine};
use crate::memory::ToolCall;
use crate::tools::{BudgetGuard, ToolRegistry, ToolResult, ToolSpec};

/// 单次调用的结局（供事件与审计）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok,
    Error,
    Timeout,
    BudgetExceeded,
}

impl ToolOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolOutcome::Ok => "ok",
            ToolOutcome::Error => "error",
            ToolOutcome::Timeout => "timeout",
            ToolOutcome::BudgetExceeded => "budget_exceeded",
        }
    }
}

/// 分发结果：给模型的结果 + 结局分类
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub result: ToolResult,
    pub outcome: ToolOutcome,
}

pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Duration,
    budgets: HashMap<String, Arc<BudgetGuard>>,
    recovery: RecoveryEngine,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            budgets: HashMap::new(),
            recovery: RecoveryEngine::new(),
        }
    }

    /// 没有任何工具的分发器（纯 JSON 输出阶段）
    pub fn empty() -> Self {
        Self::new(ToolRegistry::new(), 60)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 将同一个预算守卫挂到若干工具上（共享计数）
    pub fn with_budget(mut self, guard: Arc<BudgetGuard>, tool_names: &[&str]) -> Self {
        for name in tool_names {
            self.budgets.insert(name.to_string(), Arc::clone(&guard));
        }
        self
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn has_tools(&self) -> bool {
        !self.registry.is_empty()
    }

    pub async fn dispatch(&self, call: &ToolCall) -> Result<Dispatched, AgentError> {
        let tool = self.registry.get(&call.name).ok_or_else(|| AgentError::UnknownTool {
            name: call.name.clone(),
            available: self.registry.tool_names(),
        })?;

        if let Some(guard) = self.budgets.get(&call.name) {
            if !guard.try_acquire() {
                audit(&call.name, ToolOutcome::BudgetExceeded, Duration::ZERO, &call.arguments);
                return Ok(Dispatched {
                    result: ToolResult::Text(guard.exhausted_message()),
                    outcome: ToolOutcome::BudgetExceeded,
                });
            }
        }

        let start = Instant::now();
        let invocation = AssertUnwindSafe(tool.execute(call.arguments.clone())).catch_unwind();
        let result = timeout(self.timeout, invocation).await;
        let (outcome, result) = match result {
            Ok(Ok(Ok(r))) => (ToolOutcome::Ok, Ok(r)),
            Ok(Ok(Err(e))) => (ToolOutcome::Error, Err(AgentError::ToolExecutionFailed(e))),
            Ok(Err(payload)) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(tool = %call.name, %reason, "tool panicked");
                (
                    ToolOutcome::Error,
                    Err(AgentError::ToolExecutionFailed(format!(
                        "tool '{}' panicked: {reason}",
                        call.name
                    ))),
                )
            }
            Err(_) => (ToolOutcome::Timeout, Err(AgentError::ToolTimeout(call.name.clone()))),
        };
        audit(&call.name, outcome, start.elapsed(), &call.arguments);

        let result = match result {
            Ok(r) => r,
            Err(e) => ToolResult::Text(
                self.recovery
                    .tool_reply(&e)
                    .unwrap_or_else(|| format!("Error: {e}")),
            ),
        };
        Ok(Dispatched { result, outcome })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn audit(tool: &str, outcome: ToolOutcome, elapsed: Duration, args: &serde_json::Value) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": outcome == ToolOutcome::Ok,
        "outcome": outcome.as_str(),
        "duration_ms": elapsed.as_millis() as u64,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit, "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            "browse_page"
        }
        fn description(&self) -> &str {
            "fetch"
        }
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args.get("url").and_then(|v| v.as_str()) {
                Some(url) => Ok(ToolResult::text(format!("page {url}"))),
                None => Err("missing url".to_string()),
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolResult::text("late"))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "indexes past the end"
        }
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            let items: Vec<String> = Vec::new();
            let i = args["index"].as_u64().unwrap_or(3) as usize;
            Ok(ToolResult::text(items[i].clone()))
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    fn dispatcher(calls: Arc<AtomicUsize>) -> ToolDispatcher {
        let mut reg = ToolRegistry::new();
        reg.register(Counting { calls });
        reg.register(Slow);
        reg.register(Broken);
        ToolDispatcher::new(reg, 1)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let err = d.dispatch(&call("nope", json!({}))).await.unwrap_err();
        match err {
            AgentError::UnknownTool { name, available } => {
                assert_eq!(name, "nope");
                assert_eq!(available, vec!["browse_page", "slow", "broken"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_error_becomes_text() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let out = d.dispatch(&call("browse_page", json!({}))).await.unwrap();
        assert_eq!(out.outcome, ToolOutcome::Error);
        assert_eq!(out.result, ToolResult::text("Error: missing url"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_text() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let out = d.dispatch(&call("broken", json!({"index": 3}))).await.unwrap();
        assert_eq!(out.outcome, ToolOutcome::Error);
        match out.result {
            ToolResult::Text(t) => {
                assert!(t.starts_with("Error: tool 'broken' panicked: index out of bounds"), "{t}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_text() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let out = d.dispatch(&call("slow", json!({}))).await.unwrap();
        assert_eq!(out.outcome, ToolOutcome::Timeout);
        assert_eq!(out.result, ToolResult::text("Error: tool 'slow' timed out"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guard = Arc::new(BudgetGuard::new("page visit", 1));
        let d = dispatcher(Arc::clone(&calls)).with_budget(Arc::clone(&guard), &["browse_page"]);
        let first = d.dispatch(&call("browse_page", json!({"url": "https://a"}))).await.unwrap();
        assert_eq!(first.outcome, ToolOutcome::Ok);
        let second = d.dispatch(&call("browse_page", json!({"url": "https://b"}))).await.unwrap();
        assert_eq!(second.outcome, ToolOutcome::BudgetExceeded);
        match second.result {
            ToolResult::Text(t) => assert!(t.starts_with("Budget exceeded")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
