//! 对话循环（单个 agent 的多轮工具调用）
//!
//! 每一轮：检查取消与轮数上限 → 发送历史与工具 schema（与取消竞速）→
//! 有工具调用则并发分发、按请求顺序追加回复，否则把文本交给结构化输出校验器。
//! 校验失败进入纠正重试：撤掉工具、要求 JSON 模式，只追加失败原因与固定指令。

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSection;
use crate::core::{AgentError, ConvergenceError, RecoveryEngine};
use crate::llm::{ChatRequest, ModelTransport, Usage};
use crate::memory::{ContentPart, Message, ToolCall};
use crate::react::events::{AgentEvent, Observer};
use crate::react::validator::{OutputValidator, StructuredOutput, Verdict};
use crate::tools::{translate_tools, ImageSequence, ToolDispatcher, ToolOutcome, ToolResult};

/// 每张截图切片对应的页面高度（px）
const TILE_HEIGHT_PX: usize = 800;
/// 事件中工具结果预览长度
const PREVIEW_CHARS: usize = 200;

/// 截图的消息片段：标题 + 前 `max_tiles` 张切片，每张前加位置说明
pub fn image_parts(seq: &ImageSequence, max_tiles: usize) -> Vec<ContentPart> {
    let total = seq.tiles.len();
    let mut parts = vec![ContentPart::Text {
        text: format!("Screenshot of {}:", seq.source),
    }];
    for (i, tile) in seq.tiles.iter().take(max_tiles).enumerate() {
        parts.push(ContentPart::Text {
            text: format!("[Section {}/{}, y={}px]", i + 1, total, i * TILE_HEIGHT_PX),
        });
        parts.push(ContentPart::Image { data: tile.clone() });
    }
    parts
}

/// 一次成功运行的结果
#[derive(Debug, Clone)]
pub struct AgentRun<T> {
    pub output: T,
    /// 工具返回的全部截图序列（视觉证据）
    pub evidence: Vec<ImageSequence>,
    pub usage: Usage,
    pub turns: usize,
    /// 结构化输出用了几次尝试
    pub attempts: u32,
}

/// 单个 agent 的会话配置
pub struct AgentSession {
    transport: Arc<dyn ModelTransport>,
    dispatcher: Arc<ToolDispatcher>,
    cancel_token: CancellationToken,
    observer: Observer,
    recovery: RecoveryEngine,
    max_turns: usize,
    max_output_attempts: u32,
    max_images_per_result: usize,
}

impl AgentSession {
    pub fn new(transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            transport,
            dispatcher: Arc::new(ToolDispatcher::empty()),
            cancel_token: CancellationToken::new(),
            observer: Observer::noop(),
            recovery: RecoveryEngine::new(),
            max_turns: 30,
            max_output_attempts: 3,
            max_images_per_result: 2,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    /// 轮数、输出尝试次数与每个结果展示的图片数
    pub fn with_limits(mut self, engine: &EngineSection) -> Self {
        self.max_turns = engine.max_turns;
        self.max_output_attempts = u32::try_from(engine.max_output_attempts).unwrap_or(u32::MAX);
        self.max_images_per_result = engine.max_images_per_result;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_output_attempts(mut self, attempts: u32) -> Self {
        self.max_output_attempts = attempts;
        self
    }

    /// 发送一次请求；与取消令牌竞速
    async fn send(&self, request: ChatRequest<'_>) -> Result<crate::llm::AssistantTurn, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AgentError::Cancelled),
            reply = self.transport.send(request) => {
                let reply = reply?;
                self.observer.emit(AgentEvent::TokenUsage {
                    prompt_tokens: reply.usage.prompt_tokens,
                    completion_tokens: reply.usage.completion_tokens,
                });
                Ok(reply)
            }
        }
    }

    /// 分发单个调用；未知工具等工具层错误转为文本回复
    async fn dispatch_one(&self, call: &ToolCall) -> ToolResult {
        match self.dispatcher.dispatch(call).await {
            Ok(dispatched) => {
                if dispatched.outcome == ToolOutcome::BudgetExceeded {
                    self.observer.emit(AgentEvent::BudgetExceeded {
                        tool: call.name.clone(),
                    });
                }
                self.observer.emit(AgentEvent::ToolInvoked {
                    tool: call.name.clone(),
                    outcome: dispatched.outcome.as_str().to_string(),
                    preview: dispatched.result.preview(PREVIEW_CHARS),
                });
                dispatched.result
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call rejected");
                let reply = self
                    .recovery
                    .tool_reply(&e)
                    .unwrap_or_else(|| format!("Error: {e}"));
                self.observer.emit(AgentEvent::ToolInvoked {
                    tool: call.name.clone(),
                    outcome: "rejected".to_string(),
                    preview: reply.clone(),
                });
                ToolResult::Text(reply)
            }
        }
    }

    fn image_summary(&self, seq: &ImageSequence) -> String {
        let shown = seq.tiles.len().min(self.max_images_per_result);
        format!(
            "Screenshot of {}: {} section(s) captured, the first {} attached in the next message.",
            seq.source,
            seq.tiles.len(),
            shown
        )
    }

    /// 截图后续消息
    fn image_message(&self, seq: &ImageSequence) -> Message {
        Message::user_parts(image_parts(seq, self.max_images_per_result))
    }

    /// 运行到得到合法的 `T`，或出错 / 取消 / 不收敛
    pub async fn run_agent<T: StructuredOutput>(
        &self,
        system: &str,
        initial: Message,
    ) -> Result<AgentRun<T>, AgentError> {
        let tool_schemas: Vec<Value> =
            translate_tools(&self.dispatcher.specs(), self.transport.tool_format());
        let mut history = vec![initial];
        let mut validator = OutputValidator::<T>::new(self.max_output_attempts);
        let mut evidence = Vec::new();
        let mut usage = Usage::default();
        let mut turns = 0;
        let no_tools: &[Value] = &[];

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if turns >= self.max_turns {
                tracing::warn!(turns, "turn ceiling reached without a final answer");
                return Err(ConvergenceError::TurnCeiling { turns }.into());
            }
            turns += 1;
            self.observer.emit(AgentEvent::Turn { turn: turns });

            let correcting = validator.is_correcting();
            let request = ChatRequest {
                system,
                messages: &history,
                tools: if correcting { no_tools } else { &tool_schemas[..] },
                json_mode: correcting,
            };
            let reply = self.send(request).await?;
            usage.add(reply.usage);

            if !reply.tool_calls.is_empty() {
                let calls = reply.tool_calls;
                history.push(Message::assistant_with_calls(reply.text, calls.clone()));
                tracing::debug!(count = calls.len(), turn = turns, "dispatching tool calls");
                let results = join_all(calls.iter().map(|c| self.dispatch_one(c))).await;

                let mut followups = Vec::new();
                for (call, result) in calls.iter().zip(results) {
                    match result {
                        ToolResult::Text(text) => history.push(Message::tool(&call.id, text)),
                        ToolResult::Images(seq) => {
                            history.push(Message::tool(&call.id, self.image_summary(&seq)));
                            followups.push(self.image_message(&seq));
                            evidence.push(seq);
                        }
                    }
                }
                history.extend(followups);
                continue;
            }

            match validator.submit(&reply.text) {
                Verdict::Accept(output) => {
                    return Ok(AgentRun {
                        output,
                        evidence,
                        usage,
                        turns,
                        attempts: validator.attempt(),
                    });
                }
                Verdict::Retry { reason, corrective } => {
                    tracing::info!(attempt = validator.attempt(), reason = %reason, "structured output rejected, retrying");
                    self.observer.emit(AgentEvent::OutputRetry {
                        attempt: validator.attempt(),
                        reason,
                    });
                    history.push(Message::assistant(reply.text));
                    history.push(Message::user(corrective));
                    validator.redraft();
                }
                Verdict::Exhausted(e) => {
                    tracing::warn!(error = %e, "structured output retries exhausted");
                    return Err(e.into());
                }
            }
        }
    }

    /// 纯文本单轮补全（不带工具、不做结构化校验），返回文本与用量
    pub async fn complete_text(&self, system: &str, initial: Message) -> Result<(String, Usage), AgentError> {
        if self.cancel_token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let history = [initial];
        let reply = self
            .send(ChatRequest {
                system,
                messages: &history,
                tools: &[],
                json_mode: false,
            })
            .await?;
        let text = reply.text.trim().to_string();
        if text.is_empty() {
            return Err(crate::core::LlmError::InvalidResponse("empty completion".into()).into());
        }
        Ok((text, reply.usage))
    }
}
