//! 可观测性：日志初始化与进度打印

use tokio::sync::broadcast;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::react::PipelineEvent;

/// 默认 info，`--verbose` 时 debug；RUST_LOG 优先
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose))
        .init();
}

/// 订阅进度通道，把调度层事件转成日志；落后的订阅者丢弃中间更新
pub fn spawn_progress_logger(mut rx: broadcast::Receiver<PipelineEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::StageStarted { stage }) => tracing::info!("▶ {stage}"),
                Ok(PipelineEvent::StageSucceeded { stage }) => tracing::info!("✔ {stage}"),
                Ok(PipelineEvent::StageFailed { stage, reason }) => tracing::warn!("✘ {stage}: {reason}"),
                Ok(PipelineEvent::StageSkipped { stage, reason }) => tracing::info!("⏭ {stage}: {reason}"),
                Ok(PipelineEvent::StageCancelled { stage }) => tracing::warn!("⏹ {stage} cancelled"),
                Ok(PipelineEvent::FeatureFailed { feature, reason }) => {
                    tracing::warn!("feature '{feature}' not evaluated: {reason}")
                }
                Ok(PipelineEvent::Agent { stage, event }) => tracing::debug!(?stage, ?event, "agent"),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "progress receiver lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
