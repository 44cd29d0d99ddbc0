//! 限流重试包装
//!
//! 包装任意 ModelTransport：遇到 429 时按 base_delay * 2^n 指数退避后重发同一请求，
//! 最多 max_retries 次；请求过大 / 超出上下文等错误直接返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{AgentError, LlmError, RecoveryAction, RecoveryEngine};
use crate::llm::{AssistantTurn, ChatRequest, ModelTransport, ToolFormat};

/// 重试参数
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试前的等待时长；服务端给出的 retry-after 更长时以其为准
    pub fn delay_for(&self, attempt: u32, retry_after_ms: u64) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        backoff.max(Duration::from_millis(retry_after_ms))
    }
}

pub struct RetryingTransport {
    inner: Arc<dyn ModelTransport>,
    config: RetryConfig,
    recovery: RecoveryEngine,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn ModelTransport>, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            recovery: RecoveryEngine::new(),
        }
    }
}

#[async_trait]
impl ModelTransport for RetryingTransport {
    async fn send(&self, request: ChatRequest<'_>) -> Result<AssistantTurn, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.send(request).await {
                Ok(turn) => return Ok(turn),
                Err(e) => {
                    let action = self.recovery.handle(&AgentError::Llm(e.clone()));
                    let RecoveryAction::Backoff(retry_after_ms) = action else {
                        return Err(e);
                    };
                    if attempt >= self.config.max_retries {
                        tracing::warn!(attempts = attempt + 1, "rate limit retries exhausted");
                        return Err(e);
                    }
                    let delay = self.config.delay_for(attempt, retry_after_ms);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn tool_format(&self) -> ToolFormat {
        self.inner.tool_format()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
