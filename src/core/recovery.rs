//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction：工具错误与格式错误转为给模型的修正提示，
//! 限流转为退避，其余终止当前阶段。

use crate::core::{AgentError, LlmError, RecoveryAction};

/// 结构化输出重试时附加的固定指令（不重复原任务，保持上下文精简）
pub const CORRECTIVE_INSTRUCTION: &str =
    "Reply with only a single JSON object that conforms to the required schema. Do not include any other text.";

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Validation(reason) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous response could not be accepted: {reason}\n\n{CORRECTIVE_INSTRUCTION}"
            )),
            AgentError::UnknownTool { name, available } => RecoveryAction::RetryWithPrompt(
                format!(
                    "Error: unknown tool '{name}'. Available tools: {}",
                    if available.is_empty() {
                        "(none)".to_string()
                    } else {
                        available.join(", ")
                    }
                ),
            ),
            AgentError::ToolExecutionFailed(msg) => {
                RecoveryAction::RetryWithPrompt(format!("Error: {msg}"))
            }
            AgentError::ToolTimeout(tool) => {
                RecoveryAction::RetryWithPrompt(format!("Error: tool '{tool}' timed out"))
            }
            AgentError::PathEscape(path) => RecoveryAction::RetryWithPrompt(format!(
                "Error: path '{path}' is outside the allowed root"
            )),
            AgentError::BudgetExceeded(msg) => {
                RecoveryAction::RetryWithPrompt(format!("Budget exceeded: {msg}"))
            }
            AgentError::Llm(LlmError::RateLimited { retry_after_ms }) => {
                RecoveryAction::Backoff(*retry_after_ms)
            }
            _ => RecoveryAction::Abort,
        }
    }

    /// 工具层错误对应的回复文本；非工具错误返回 None
    pub fn tool_reply(&self, err: &AgentError) -> Option<String> {
        if !err.is_tool_level() {
            return None;
        }
        match self.handle(err) {
            RecoveryAction::RetryWithPrompt(text) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConvergenceError;

    #[test]
    fn test_recovery_validation_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Validation("missing field `title`".to_string());
        match engine.handle(&err) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("missing field `title`"));
                assert!(msg.ends_with(CORRECTIVE_INSTRUCTION));
            }
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_unknown_tool_lists_available() {
        let engine = RecoveryEngine::new();
        let err = AgentError::UnknownTool {
            name: "fake_tool".to_string(),
            available: vec!["read_file".into(), "search_code".into()],
        };
        let reply = engine.tool_reply(&err).unwrap();
        assert!(reply.contains("fake_tool"));
        assert!(reply.contains("read_file, search_code"));
    }

    #[test]
    fn test_recovery_tool_timeout() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ToolTimeout("browse_page".to_string());
        assert_eq!(
            engine.tool_reply(&err).as_deref(),
            Some("Error: tool 'browse_page' timed out")
        );
    }

    #[test]
    fn test_recovery_rate_limited() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::RateLimited { retry_after_ms: 1000 });
        assert_eq!(engine.handle(&err), RecoveryAction::Backoff(1000));
        assert!(engine.tool_reply(&err).is_none());
    }

    #[test]
    fn test_recovery_terminal_errors_abort() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&AgentError::Cancelled), RecoveryAction::Abort);
        let err = AgentError::Convergence(ConvergenceError::TurnCeiling { turns: 30 });
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }
}
