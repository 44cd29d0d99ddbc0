//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Backoff / Abort。
//! 工具错误与预算耗尽永远不会逃出对话循环；Validation 只在重试耗尽后以 Convergence 形式逃出。

use thiserror::Error;

/// 模型传输层错误（OpenAI 兼容端点 / 脚本化传输）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 429 限流；retry_after_ms 为建议等待时长
    #[error("Rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    /// 请求过大 / 超出上下文窗口，重试无意义
    #[error("Context too large: {0}")]
    ContextTooLarge(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 是否值得退避重试（仅限流）
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }
}

/// 对话未收敛：结构化输出重试耗尽，或达到轮数上限
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvergenceError {
    #[error("structured output still invalid after {attempts} attempts: {last_error}")]
    ValidationExhausted { attempts: usize, last_error: String },

    #[error("no final answer within {turns} turns")]
    TurnCeiling { turns: usize },
}

/// Agent / 阶段运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 模型请求了未注册的工具
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String, available: Vec<String> },

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// 单次结构化输出校验失败（可在重试预算内恢复）
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Did not converge: {0}")]
    Convergence(#[from] ConvergenceError),

    #[error("Blocked: {stage} depends on {dependency}, which did not succeed")]
    DependencyBlocked { stage: String, dependency: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

impl AgentError {
    /// 工具层错误：由对话循环转为文本回复，不终止阶段
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            AgentError::ToolExecutionFailed(_)
                | AgentError::ToolTimeout(_)
                | AgentError::UnknownTool { .. }
                | AgentError::BudgetExceeded(_)
                | AgentError::PathEscape(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型自行修正（工具错误 / 输出格式错误）
    RetryWithPrompt(String),
    /// 等待后重发同一请求（限流）
    Backoff(u64),
    /// 终止当前阶段
    Abort,
}
