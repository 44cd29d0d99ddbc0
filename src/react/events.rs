//! 过程事件与观察者
//!
//! AgentEvent 由对话循环产生，PipelineEvent 由调度器产生（含包装后的 AgentEvent）。
//! Observer 同时写两条通道：
//! - progress：`broadcast`，瞬时进度，接收方落后时丢弃；
//! - persistent：无界 `mpsc`，有序且不丢，调度器把它汇入 PipelineState 的事件日志。
//!
//! 发送失败（无接收方）一律忽略，观察者永远不阻塞、不让循环失败。

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::core::StageId;

/// 单个 agent 对话循环内的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 第几轮请求
    Turn { turn: usize },
    /// 一次工具调用结束（结果预览）
    ToolInvoked {
        tool: String,
        outcome: String,
        preview: String,
    },
    /// 预算耗尽，工具未被调用
    BudgetExceeded { tool: String },
    /// 结构化输出校验失败，发起纠正重试
    OutputRetry { attempt: u32, reason: String },
    /// 单次请求的 token 用量
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },
}

/// 调度层事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted { run_id: String },
    StageStarted { stage: StageId },
    StageSucceeded { stage: StageId },
    StageFailed { stage: StageId, reason: String },
    StageSkipped { stage: StageId, reason: String },
    /// 取消后状态回到 Pending
    StageCancelled { stage: StageId },
    /// 单个功能的技术选型评估失败（其余功能继续）
    FeatureFailed { feature: String, reason: String },
    /// 阶段累计 token
    StageUsage {
        stage: StageId,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    Agent {
        stage: Option<StageId>,
        event: AgentEvent,
    },
    PatchMerged { replaced: usize, appended: usize },
    RunFinished {
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
}

/// 事件观察者；clone 后共享同一组通道
#[derive(Debug, Clone, Default)]
pub struct Observer {
    progress: Option<broadcast::Sender<PipelineEvent>>,
    persistent: Option<mpsc::UnboundedSender<PipelineEvent>>,
    stage: Option<StageId>,
}

impl Observer {
    /// 什么都不做的观察者
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn new(
        progress: Option<broadcast::Sender<PipelineEvent>>,
        persistent: Option<mpsc::UnboundedSender<PipelineEvent>>,
    ) -> Self {
        Self {
            progress,
            persistent,
            stage: None,
        }
    }

    /// 绑定阶段，之后 emit 的 AgentEvent 带上阶段标识
    pub fn for_stage(&self, stage: StageId) -> Self {
        Self {
            stage: Some(stage),
            ..self.clone()
        }
    }

    pub fn stage(&self) -> Option<StageId> {
        self.stage
    }

    pub fn emit(&self, event: AgentEvent) {
        self.publish(PipelineEvent::Agent {
            stage: self.stage,
            event,
        });
    }

    pub fn publish(&self, event: PipelineEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event.clone());
        }
        if let Some(tx) = &self.persistent {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_event_is_nested() {
        let ev = PipelineEvent::Agent {
            stage: Some(StageId::Research),
            event: AgentEvent::BudgetExceeded {
                tool: "browse_page".into(),
            },
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "agent");
        assert_eq!(v["stage"], "research");
        assert_eq!(v["event"]["type"], "budget_exceeded");
        assert_eq!(v["event"]["tool"], "browse_page");
        let back: PipelineEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, ev);
    }

    #[tokio::test]
    async fn test_observer_never_fails_without_receivers() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let (ptx, _) = broadcast::channel(1);
        let obs = Observer::new(Some(ptx), Some(tx)).for_stage(StageId::CodeAnalysis);
        obs.emit(AgentEvent::Turn { turn: 1 });
        obs.publish(PipelineEvent::StageStarted {
            stage: StageId::CodeAnalysis,
        });
    }

    #[tokio::test]
    async fn test_persistent_channel_keeps_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let obs = Observer::new(None, Some(tx));
        for turn in 1..=3 {
            obs.emit(AgentEvent::Turn { turn });
        }
        for turn in 1..=3 {
            match rx.recv().await.unwrap() {
                PipelineEvent::Agent {
                    event: AgentEvent::Turn { turn: t },
                    ..
                } => assert_eq!(t, turn),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
