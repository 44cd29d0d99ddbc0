//! 结构化输出校验
//!
//! 模型最终回复 → 提取 JSON → serde 反序列化为目标类型 → 语义检查（`StructuredOutput::check`）。
//! OutputValidator 是带显式尝试次数的有界状态机：
//!
//! ```text
//! Drafting(k) → Validating(k) → Success
//!                             → Retrying(k) → Drafting(k+1)   (k < N)
//!                             → Exhausted                      (k = N)
//! ```
//!
//! 第 N 次失败直接结束，不会再发第 N+1 次请求。

use std::marker::PhantomData;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::{AgentError, ConvergenceError, RecoveryAction, RecoveryEngine, CORRECTIVE_INSTRUCTION};

/// 可作为 agent 最终输出的类型
pub trait StructuredOutput: DeserializeOwned + JsonSchema + Send + 'static {
    /// 反序列化之后的语义约束；Err 为给模型看的原因
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    /// 注入 system prompt 的 JSON Schema
    fn schema_json() -> String
    where
        Self: Sized,
    {
        serde_json::to_string_pretty(&schemars::schema_for!(Self)).unwrap_or_default()
    }
}

/// 从文本开头流式解析一个 JSON 值，忽略其后的多余文本
fn parse_leading(text: &str) -> Result<Value, String> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) if value.is_object() => Ok(value),
        Some(Ok(_)) => Err("expected a JSON object".to_string()),
        Some(Err(e)) => Err(format!("invalid JSON: {e}")),
        None => Err("empty response".to_string()),
    }
}

/// 第一个 ``` 代码块的内容（优先 ```json）
fn fenced_block(text: &str) -> Option<&str> {
    let start = text
        .find("```json")
        .map(|i| i + "```json".len())
        .or_else(|| text.find("```").map(|i| i + 3))?;
    let rest = &text[start..];
    // 跳过语言标记所在行的剩余部分
    let rest = match rest.find('\n') {
        Some(i) if !rest[..i].contains('{') => &rest[i + 1..],
        _ => rest,
    };
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// 从模型回复中提取 JSON 对象
///
/// 依次尝试：整段以 `{` 开头直接解析 → 第一个代码块 → 第一个 `{` 起流式解析。
pub fn extract_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        if let Ok(v) = parse_leading(trimmed) {
            return Ok(v);
        }
    }
    if let Some(block) = fenced_block(trimmed) {
        if block.starts_with('{') {
            if let Ok(v) = parse_leading(block) {
                return Ok(v);
            }
        }
    }
    match trimmed.find('{') {
        Some(i) => parse_leading(&trimmed[i..]),
        None => Err("no JSON object found in the response".to_string()),
    }
}

/// 提取 + 反序列化 + 语义检查
pub fn validate<T: StructuredOutput>(text: &str) -> Result<T, AgentError> {
    let value = extract_json(text).map_err(AgentError::Validation)?;
    let parsed: T = serde_json::from_value(value)
        .map_err(|e| AgentError::Validation(format!("schema mismatch: {e}")))?;
    parsed.check().map_err(AgentError::Validation)?;
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputPhase {
    Drafting { attempt: u32 },
    Validating { attempt: u32 },
    Retrying { attempt: u32, reason: String },
    Success { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

/// 一次提交的裁决
#[derive(Debug)]
pub enum Verdict<T> {
    Accept(T),
    /// 追加 assistant 原文与 corrective 消息后重试
    Retry { reason: String, corrective: String },
    Exhausted(ConvergenceError),
}

pub struct OutputValidator<T> {
    phase: OutputPhase,
    max_attempts: u32,
    recovery: RecoveryEngine,
    _output: PhantomData<fn() -> T>,
}

impl<T: StructuredOutput> OutputValidator<T> {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            phase: OutputPhase::Drafting { attempt: 1 },
            max_attempts: max_attempts.max(1),
            recovery: RecoveryEngine::new(),
            _output: PhantomData,
        }
    }

    pub fn phase(&self) -> &OutputPhase {
        &self.phase
    }

    pub fn attempt(&self) -> u32 {
        match &self.phase {
            OutputPhase::Drafting { attempt }
            | OutputPhase::Validating { attempt }
            | OutputPhase::Retrying { attempt, .. } => *attempt,
            OutputPhase::Success { attempts } | OutputPhase::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// 已经进入纠正重试（之后的请求撤掉工具、要求 JSON 模式）
    pub fn is_correcting(&self) -> bool {
        self.attempt() > 1
    }

    /// 提交一次候选回复
    pub fn submit(&mut self, text: &str) -> Verdict<T> {
        let attempt = self.attempt();
        self.phase = OutputPhase::Validating { attempt };
        match validate::<T>(text) {
            Ok(value) => {
                self.phase = OutputPhase::Success { attempts: attempt };
                Verdict::Accept(value)
            }
            Err(err) => {
                let reason = match &err {
                    AgentError::Validation(r) => r.clone(),
                    other => other.to_string(),
                };
                if attempt >= self.max_attempts {
                    self.phase = OutputPhase::Exhausted {
                        attempts: attempt,
                        last_error: reason.clone(),
                    };
                    return Verdict::Exhausted(ConvergenceError::ValidationExhausted {
                        attempts: attempt as usize,
                        last_error: reason,
                    });
                }
                let corrective = match self.recovery.handle(&err) {
                    RecoveryAction::RetryWithPrompt(p) => p,
                    _ => format!("{reason}\n\n{CORRECTIVE_INSTRUCTION}"),
                };
                self.phase = OutputPhase::Retrying {
                    attempt,
                    reason: reason.clone(),
                };
                Verdict::Retry { reason, corrective }
            }
        }
    }

    /// Retrying(k) → Drafting(k+1)
    pub fn redraft(&mut self) {
        if let OutputPhase::Retrying { attempt, .. } = self.phase {
            self.phase = OutputPhase::Drafting { attempt: attempt + 1 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize, JsonSchema)]
    struct Answer {
        id: String,
        score: u8,
    }

    impl StructuredOutput for Answer {
        fn check(&self) -> Result<(), String> {
            if self.score > 10 {
                return Err(format!("score {} out of range", self.score));
            }
            Ok(())
        }
    }

    #[test]
    fn test_extract_direct_with_trailing_text() {
        let v = extract_json(r#"{"id": "a", "score": 1} trailing notes"#).unwrap();
        assert_eq!(v["id"], "a");
    }

    #[test]
    fn test_extract_fenced_in_prose() {
        let text = "Here is the result:\n```json\n{\"id\": \"x\", \"score\": 3}\n```\nThanks!";
        let answer: Answer = validate(text).unwrap();
        assert_eq!(answer, Answer { id: "x".into(), score: 3 });
    }

    #[test]
    fn test_extract_plain_fence_and_brace_fallback() {
        let fenced = "```\n{\"id\": \"y\", \"score\": 2}\n```";
        assert_eq!(extract_json(fenced).unwrap()["id"], "y");
        let prose = "The answer is {\"id\": \"z\", \"score\": 4} as requested.";
        assert_eq!(extract_json(prose).unwrap()["score"], 4);
    }

    #[test]
    fn test_no_json_is_a_reason() {
        let err = extract_json("I could not finish the analysis.").unwrap_err();
        assert!(err.contains("no JSON object"));
    }

    #[test]
    fn test_schema_and_check_failures() {
        let missing = validate::<Answer>(r#"{"id": "a"}"#).unwrap_err();
        assert!(matches!(missing, AgentError::Validation(r) if r.contains("score")));
        let range = validate::<Answer>(r#"{"id": "a", "score": 11}"#).unwrap_err();
        assert_eq!(range, AgentError::Validation("score 11 out of range".into()));
    }

    #[test]
    fn test_state_machine_exhausts_after_n() {
        let mut v = OutputValidator::<Answer>::new(3);
        for attempt in 1..=2 {
            assert_eq!(v.attempt(), attempt);
            match v.submit("not json") {
                Verdict::Retry { corrective, .. } => {
                    assert!(corrective.ends_with(CORRECTIVE_INSTRUCTION));
                }
                other => panic!("unexpected {other:?}"),
            }
            v.redraft();
        }
        match v.submit("still not json") {
            Verdict::Exhausted(ConvergenceError::ValidationExhausted { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(v.phase(), OutputPhase::Exhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_state_machine_success_after_retry() {
        let mut v = OutputValidator::<Answer>::new(3);
        assert!(matches!(v.submit("{}"), Verdict::Retry { .. }));
        v.redraft();
        assert!(v.is_correcting());
        match v.submit(r#"{"id": "ok", "score": 5}"#) {
            Verdict::Accept(a) => assert_eq!(a.id, "ok"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(v.phase(), &OutputPhase::Success { attempts: 2 });
    }
}
