//! 对话循环集成测试：工具回复顺序、围栏 JSON 恢复、结构化输出重试上限

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea::core::{AgentError, ConvergenceError};
use sea::llm::{AssistantTurn, ScriptStep, ScriptedTransport};
use sea::memory::{Message, Role, ToolCall};
use sea::react::AgentSession;
use sea::schemas::Pass1Output;
use sea::tools::{Tool, ToolDispatcher, ToolRegistry, ToolResult};
use serde_json::{json, Value};

/// 按参数里的毫秒数睡眠后回显 id
struct SlowEcho;

#[async_trait]
impl Tool for SlowEcho {
    fn name(&self) -> &str {
        "slow_echo"
    }

    fn description(&self) -> &str {
        "Sleeps for `ms` milliseconds and echoes `id`"
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ToolResult::text(format!("echo {}", args["id"].as_str().unwrap_or_default())))
    }
}

/// 每次调用都会越界 panic
struct OutOfBounds;

#[async_trait]
impl Tool for OutOfBounds {
    fn name(&self) -> &str {
        "out_of_bounds"
    }

    fn description(&self) -> &str {
        "Reads an element that does not exist"
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
        let items: Vec<String> = Vec::new();
        let index = items.len() + 3;
        Ok(ToolResult::text(items[index].clone()))
    }
}

fn call(id: &str, ms: u64) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: "slow_echo".into(),
        arguments: json!({"id": id, "ms": ms}),
    }
}

fn pass1_json() -> String {
    json!({
        "recommendations": [{"id": "REC-001", "title": "Search", "description": "Add search", "rank": 1}],
        "summary": "one item"
    })
    .to_string()
}

#[tokio::test(start_paused = true)]
async fn test_tool_replies_follow_request_order() {
    let transport = Arc::new(ScriptedTransport::new().with_default_script(vec![
        ScriptStep::Reply(AssistantTurn::tool_calls(vec![
            call("a", 300),
            call("b", 10),
            call("c", 120),
        ])),
        ScriptStep::Reply(AssistantTurn::text(pass1_json())),
    ]));
    let mut registry = ToolRegistry::new();
    registry.register(SlowEcho);
    let session = AgentSession::new(transport.clone()).with_dispatcher(ToolDispatcher::new(registry, 5));

    let run = session
        .run_agent::<Pass1Output>("You are the Feature Ranking agent.", Message::user("rank"))
        .await
        .unwrap();
    assert_eq!(run.output.recommendations[0].id, "REC-001");
    assert_eq!(run.turns, 2);

    let second = &transport.requests()[1].messages;
    let replies: Vec<_> = second
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.clone().unwrap_or_default(), m.content.clone()))
        .collect();
    assert_eq!(
        replies,
        vec![
            ("a".to_string(), "echo a".to_string()),
            ("b".to_string(), "echo b".to_string()),
            ("c".to_string(), "echo c".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tool_calls_run_concurrently() {
    let transport = Arc::new(ScriptedTransport::new().with_default_script(vec![
        ScriptStep::Reply(AssistantTurn::tool_calls(vec![call("a", 1_000), call("b", 1_000)])),
        ScriptStep::Reply(AssistantTurn::text(pass1_json())),
    ]));
    let mut registry = ToolRegistry::new();
    registry.register(SlowEcho);
    let session = AgentSession::new(transport).with_dispatcher(ToolDispatcher::new(registry, 5));

    let started = tokio::time::Instant::now();
    session
        .run_agent::<Pass1Output>("You are the Feature Ranking agent.", Message::user("rank"))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[tokio::test]
async fn test_fenced_json_in_prose_is_recovered() {
    let payload = pass1_json();
    let reply = format!("Here is the ranking you asked for:\n\n```json\n{payload}\n```\n\nLet me know!");
    let transport = Arc::new(
        ScriptedTransport::new().with_default_script(vec![ScriptStep::Reply(AssistantTurn::text(reply))]),
    );
    let run = AgentSession::new(transport.clone())
        .run_agent::<Pass1Output>("You are the Feature Ranking agent.", Message::user("rank"))
        .await
        .unwrap();

    let expected: Pass1Output = serde_json::from_str(&payload).unwrap();
    assert_eq!(run.output, expected);
    assert_eq!(run.attempts, 1);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_invalid_output_exhausts_after_exact_attempts() {
    let transport = Arc::new(ScriptedTransport::new().with_default_script(vec![ScriptStep::Reply(
        AssistantTurn::text("I think search is the most important feature."),
    )]));
    let err = AgentSession::new(transport.clone())
        .with_max_output_attempts(3)
        .run_agent::<Pass1Output>("You are the Feature Ranking agent.", Message::user("rank"))
        .await
        .unwrap_err();

    match err {
        AgentError::Convergence(ConvergenceError::ValidationExhausted { attempts, .. }) => {
            assert_eq!(attempts, 3)
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[0].json_mode);
    assert!(requests[1].json_mode && requests[2].json_mode);
}

#[tokio::test]
async fn test_schema_violation_gets_corrective_turn() {
    let bad = json!({"recommendations": [{"id": "REC-001", "title": "Search", "description": "d",
        "scores": {"user_value": 42}}]})
    .to_string();
    let transport = Arc::new(ScriptedTransport::new().with_default_script(vec![
        ScriptStep::Reply(AssistantTurn::text(bad)),
        ScriptStep::Reply(AssistantTurn::text(pass1_json())),
    ]));
    let run = AgentSession::new(transport.clone())
        .run_agent::<Pass1Output>("You are the Feature Ranking agent.", Message::user("rank"))
        .await
        .unwrap();
    assert_eq!(run.attempts, 2);

    let retry = &transport.requests()[1];
    let corrective = retry.messages.last().unwrap();
    assert_eq!(corrective.role, Role::User);
    assert!(corrective.content.contains("user_value"), "{}", corrective.content);
}

#[tokio::test]
async fn test_panicking_tool_becomes_error_reply_and_loop_finishes() {
    let transport = Arc::new(ScriptedTransport::new().with_default_script(vec![
        ScriptStep::Reply(AssistantTurn::tool_calls(vec![
            ToolCall {
                id: "boom".into(),
                name: "out_of_bounds".into(),
                arguments: json!({}),
            },
            call("fine", 5),
        ])),
        ScriptStep::Reply(AssistantTurn::text(pass1_json())),
    ]));
    let mut registry = ToolRegistry::new();
    registry.register(OutOfBounds);
    registry.register(SlowEcho);
    let session = AgentSession::new(transport.clone()).with_dispatcher(ToolDispatcher::new(registry, 5));

    let run = session
        .run_agent::<Pass1Output>("You are the Feature Ranking agent.", Message::user("rank"))
        .await
        .unwrap();
    assert_eq!(run.output.recommendations[0].id, "REC-001");

    let second = &transport.requests()[1].messages;
    let replies: Vec<_> = second.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].tool_call_id.as_deref(), Some("boom"));
    assert!(
        replies[0].content.starts_with("Error: tool 'out_of_bounds' panicked"),
        "{}",
        replies[0].content
    );
    assert_eq!(replies[1].content, "echo fine");
}
