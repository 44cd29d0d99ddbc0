//! 工作流引擎
//!
//! Orchestrator 按计划逐组执行阶段，是 PipelineState 唯一的写入者：
//! - 启动前按依赖与适用性决定跳过（BlockedByFailedDependency / NotApplicable）；
//! - 并行组用 join_all 同时推进，全部返回后再依次写回状态；已启动的兄弟阶段不因同伴失败而取消；
//! - 4G 逐个功能调用，部分失败记入 failed_features，全部失败才算阶段失败；
//! - 取消的阶段不写入任何结果，状态回到 Pending；
//! - 持久事件通道在每个阶段结束后汇入事件日志。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::agents::features_for_run;
use crate::config::AnalysisConfig;
use crate::core::{
    AgentError, PipelineState, ScreenshotEntry, SessionSupervisor, SkipReason, StageId, StageStatus,
};
use crate::llm::Usage;
use crate::react::{Observer, PipelineEvent};
use crate::schemas::TechStackAdvisorOutput;
use crate::workflow::graph::StageGraph;
use crate::workflow::types::*;

/// 汇总阶段失败时报告中使用的文本
pub const SYNTHESIS_FALLBACK: &str =
    "Executive summary generation failed. See individual sections below.";

/// 阶段执行器 trait
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// 执行单个阶段调用；取消时返回 `AgentError::Cancelled`
    async fn execute(
        &self,
        request: StageRequest,
        observer: Observer,
        cancel: CancellationToken,
    ) -> Result<StageOutcome, AgentError>;
}

/// 一次运行结束后计划内各阶段的去向
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub succeeded: Vec<StageId>,
    pub failed: Vec<(StageId, String)>,
    pub skipped: Vec<(StageId, SkipReason)>,
    /// 被取消或未开始的阶段
    pub pending: Vec<StageId>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

enum StageWork {
    Single(StageRequest),
    PerFeature(Vec<StageRequest>),
}

enum StageResult {
    Single(Result<StageOutcome, AgentError>),
    PerFeature(Vec<(String, Result<StageOutcome, AgentError>)>),
}

/// 第一个未满足的依赖
fn blocked_by(state: &PipelineState, stage: StageId) -> Option<StageId> {
    dependencies(stage)
        .into_iter()
        .find(|d| d.kind == DepKind::Required && !state.status(d.stage).is_success())
        .map(|d| d.stage)
}

/// 本次运行缺少该阶段所需的目标或证据
fn not_applicable(state: &PipelineState, stage: StageId) -> Option<String> {
    let cfg = &state.config;
    match stage {
        StageId::Research if !cfg.has_target_url() && !cfg.has_target_path() => {
            Some("no target_url or target_path configured".into())
        }
        StageId::CodeAnalysis | StageId::Feasibility | StageId::TechStackAdvisor
            if !cfg.has_target_path() =>
        {
            Some("no target_path configured".into())
        }
        StageId::QualityAudit if !cfg.has_target_url() => Some("no target_url configured".into()),
        StageId::DesignAudit if state.visual_evidence().is_empty() => {
            Some("no screenshots were captured".into())
        }
        _ => None,
    }
}

/// 精简计划；空白功能名被丢弃，至少要剩一个
pub fn feature_plan(features: Vec<String>) -> Result<Plan, WorkflowError> {
    let features: Vec<String> = features
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();
    if features.is_empty() {
        return Err(WorkflowError::InvalidConfiguration(
            "at least one feature name is required".into(),
        ));
    }
    Ok(Plan::features(features))
}

fn drain(state: &mut PipelineState, rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Ok(event) = rx.try_recv() {
        state.record(event);
    }
}

/// 把阶段产出写入对应槽位
fn store(state: &mut PipelineState, output: StageOutput) {
    match output {
        StageOutput::Research { output, evidence } => {
            state.research = Some(output);
            state
                .screenshots
                .extend(evidence.into_iter().map(ScreenshotEntry::from));
        }
        StageOutput::CodeAnalysis(o) => state.code_analysis = Some(o),
        StageOutput::RankingPass1(o) => state.pass1 = Some(o),
        StageOutput::Feasibility(o) => state.feasibility = Some(o),
        StageOutput::QualityAudit(o) => state.quality_audit = Some(o),
        StageOutput::TechStack(o) => state.tech_stack = Some(o),
        StageOutput::RankingPass2(o) => state.pass2 = Some(o),
        StageOutput::DesignAudit(o) => state.ux_design = Some(o),
        StageOutput::Synthesis(text) => state.executive_summary = Some(text),
    }
}

/// 流水线调度器
pub struct Orchestrator {
    executor: Arc<dyn StageExecutor>,
    supervisor: SessionSupervisor,
    progress: Option<broadcast::Sender<PipelineEvent>>,
    snapshot_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            executor,
            supervisor: SessionSupervisor::new(),
            progress: None,
            snapshot_path: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor: SessionSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// 瞬时进度通道
    pub fn with_progress(mut self, progress: broadcast::Sender<PipelineEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 运行结束后把状态写到该路径
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 完整两遍流水线
    pub async fn run(&self, state: &mut PipelineState) -> Result<RunSummary, WorkflowError> {
        self.run_plan(state, &Plan::full()).await
    }

    /// 只对指定功能跑 4B → 4G
    pub async fn run_features(
        &self,
        state: &mut PipelineState,
        features: Vec<String>,
    ) -> Result<RunSummary, WorkflowError> {
        self.run_plan(state, &feature_plan(features)?).await
    }

    /// 执行计划；设置了快照路径时结束后写盘
    pub async fn run_plan(
        &self,
        state: &mut PipelineState,
        plan: &Plan,
    ) -> Result<RunSummary, WorkflowError> {
        let summary = self.drive(state, plan).await?;
        if let Some(path) = &self.snapshot_path {
            state
                .save(path)
                .map_err(|e| WorkflowError::Snapshot(format!("{e:#}")))?;
        }
        Ok(summary)
    }

    pub(crate) async fn drive(
        &self,
        state: &mut PipelineState,
        plan: &Plan,
    ) -> Result<RunSummary, WorkflowError> {
        StageGraph::validate_plan(plan)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = Observer::new(self.progress.clone(), Some(tx));
        let config = Arc::new(state.config.clone());

        tracing::info!(run_id = %state.run_id, stages = plan.stages().len(), "pipeline run started");
        observer.publish(PipelineEvent::RunStarted {
            run_id: state.run_id.clone(),
        });
        drain(state, &mut rx);

        'groups: for group in &plan.groups {
            if self.supervisor.is_cancelled() {
                break;
            }
            match group.mode {
                GroupMode::Sequential => {
                    for stage in &group.stages {
                        if self.supervisor.is_cancelled() {
                            break 'groups;
                        }
                        if let Some(work) = self.prepare(state, *stage, plan, &config, &observer) {
                            let result = self.invoke(*stage, work, &observer).await;
                            self.apply(state, *stage, result, &observer);
                        }
                        drain(state, &mut rx);
                    }
                }
                GroupMode::Parallel => {
                    let prepared: Vec<(StageId, StageWork)> = group
                        .stages
                        .iter()
                        .filter_map(|s| {
                            self.prepare(state, *s, plan, &config, &observer)
                                .map(|w| (*s, w))
                        })
                        .collect();
                    let obs = &observer;
                    let results = join_all(prepared.into_iter().map(|(stage, work)| async move {
                        (stage, self.invoke(stage, work, obs).await)
                    }))
                    .await;
                    for (stage, result) in results {
                        self.apply(state, stage, result, &observer);
                    }
                    drain(state, &mut rx);
                }
            }
        }

        let cancelled = self.supervisor.is_cancelled();
        let summary = self.summarize(state, plan, cancelled);
        observer.publish(PipelineEvent::RunFinished {
            succeeded: summary.succeeded.len(),
            failed: summary.failed.len(),
            skipped: summary.skipped.len(),
        });
        drain(state, &mut rx);
        tracing::info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            cancelled,
            tokens = state.total_usage().total(),
            "pipeline run finished"
        );
        Ok(summary)
    }

    /// 判定跳过或准备调用；准备好的阶段标记为 Running
    fn prepare(
        &self,
        state: &mut PipelineState,
        stage: StageId,
        plan: &Plan,
        config: &Arc<AnalysisConfig>,
        observer: &Observer,
    ) -> Option<StageWork> {
        if let Some(dep) = blocked_by(state, stage) {
            self.skip(state, stage, SkipReason::BlockedByFailedDependency(dep), observer);
            return None;
        }
        if let Some(why) = not_applicable(state, stage) {
            self.skip(state, stage, SkipReason::NotApplicable(why), observer);
            return None;
        }

        let upstream = Upstream::collect(state, stage);
        let request = |feature: Option<String>| StageRequest {
            stage,
            config: Arc::clone(config),
            upstream: upstream.clone(),
            feature,
        };
        let work = if stage == StageId::TechStackAdvisor {
            let features = plan
                .features
                .clone()
                .unwrap_or_else(|| features_for_run(config, upstream.pass1.as_ref()));
            if features.is_empty() {
                self.skip(
                    state,
                    stage,
                    SkipReason::NotApplicable("no features to evaluate".into()),
                    observer,
                );
                return None;
            }
            StageWork::PerFeature(features.into_iter().map(|f| request(Some(f))).collect())
        } else {
            StageWork::Single(request(None))
        };

        tracing::info!(stage = %stage, "stage started");
        state.set_status(stage, StageStatus::Running);
        observer.publish(PipelineEvent::StageStarted { stage });
        Some(work)
    }

    /// 调用执行器；不接触 PipelineState
    async fn invoke(&self, stage: StageId, work: StageWork, observer: &Observer) -> StageResult {
        let observer = observer.for_stage(stage);
        match work {
            StageWork::Single(request) => StageResult::Single(
                self.executor
                    .execute(request, observer, self.supervisor.child_token())
                    .await,
            ),
            StageWork::PerFeature(requests) => {
                let mut results = Vec::with_capacity(requests.len());
                for request in requests {
                    let feature = request.feature.clone().unwrap_or_default();
                    if self.supervisor.is_cancelled() {
                        results.push((feature, Err(AgentError::Cancelled)));
                        break;
                    }
                    tracing::debug!(feature = %feature, "evaluating feature");
                    let result = self
                        .executor
                        .execute(request, observer.clone(), self.supervisor.child_token())
                        .await;
                    let stop = matches!(result, Err(AgentError::Cancelled));
                    results.push((feature, result));
                    if stop {
                        break;
                    }
                }
                StageResult::PerFeature(results)
            }
        }
    }

    fn apply(&self, state: &mut PipelineState, stage: StageId, result: StageResult, observer: &Observer) {
        match result {
            StageResult::Single(Ok(outcome)) => {
                let produced = outcome.output.stage();
                if produced != stage {
                    self.fail(state, stage, format!("executor returned output for {produced}"), observer);
                    return;
                }
                self.record_usage(state, stage, outcome.usage, observer);
                store(state, outcome.output);
                self.succeed(state, stage, observer);
            }
            StageResult::Single(Err(AgentError::Cancelled)) => self.cancel(state, stage, observer),
            StageResult::Single(Err(e)) => self.fail(state, stage, e.to_string(), observer),
            StageResult::PerFeature(results) => {
                if results.iter().any(|(_, r)| matches!(r, Err(AgentError::Cancelled))) {
                    self.cancel(state, stage, observer);
                    return;
                }
                self.apply_features(state, stage, results, observer);
            }
        }
    }

    fn apply_features(
        &self,
        state: &mut PipelineState,
        stage: StageId,
        results: Vec<(String, Result<StageOutcome, AgentError>)>,
        observer: &Observer,
    ) {
        let total = results.len();
        let mut features = Vec::new();
        let mut failed = Vec::new();
        let mut usage = Usage::default();
        let mut last_error = String::new();

        for (name, result) in results {
            let reason = match result {
                Ok(StageOutcome {
                    output: StageOutput::TechStack(out),
                    usage: u,
                }) => {
                    usage.add(u);
                    for mut rec in out.features {
                        rec.requested_feature = name.clone();
                        features.push(rec);
                    }
                    continue;
                }
                Ok(other) => format!("executor returned output for {}", other.output.stage()),
                Err(e) => e.to_string(),
            };
            tracing::warn!(feature = %name, reason = %reason, "feature evaluation failed");
            observer.publish(PipelineEvent::FeatureFailed {
                feature: name.clone(),
                reason: reason.clone(),
            });
            failed.push(name);
            last_error = reason;
        }

        self.record_usage(state, stage, usage, observer);
        let evaluated = total - failed.len();
        state.failed_features = failed;
        if evaluated == 0 {
            self.fail(
                state,
                stage,
                format!("all {total} feature evaluation(s) failed; last error: {last_error}"),
                observer,
            );
            return;
        }
        state.tech_stack = Some(TechStackAdvisorOutput {
            features,
            summary: format!("Evaluated {evaluated} feature(s)."),
        });
        self.succeed(state, stage, observer);
    }

    fn record_usage(&self, state: &mut PipelineState, stage: StageId, usage: Usage, observer: &Observer) {
        state.add_usage(stage, usage);
        observer.publish(PipelineEvent::StageUsage {
            stage,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        });
    }

    fn succeed(&self, state: &mut PipelineState, stage: StageId, observer: &Observer) {
        tracing::info!(stage = %stage, "stage succeeded");
        state.set_status(stage, StageStatus::Succeeded);
        observer.publish(PipelineEvent::StageSucceeded { stage });
    }

    fn fail(&self, state: &mut PipelineState, stage: StageId, reason: String, observer: &Observer) {
        tracing::warn!(stage = %stage, reason = %reason, "stage failed");
        if stage == StageId::Synthesis {
            state.executive_summary = Some(SYNTHESIS_FALLBACK.to_string());
        }
        state.set_status(stage, StageStatus::Failed { reason: reason.clone() });
        observer.publish(PipelineEvent::StageFailed { stage, reason });
    }

    fn skip(&self, state: &mut PipelineState, stage: StageId, reason: SkipReason, observer: &Observer) {
        tracing::info!(stage = %stage, reason = %reason, "stage skipped");
        observer.publish(PipelineEvent::StageSkipped {
            stage,
            reason: reason.to_string(),
        });
        state.set_status(stage, StageStatus::Skipped { reason });
    }

    fn cancel(&self, state: &mut PipelineState, stage: StageId, observer: &Observer) {
        tracing::warn!(stage = %stage, "stage cancelled");
        state.set_status(stage, StageStatus::Pending);
        observer.publish(PipelineEvent::StageCancelled { stage });
    }

    fn summarize(&self, state: &PipelineState, plan: &Plan, cancelled: bool) -> RunSummary {
        let mut summary = RunSummary {
            cancelled,
            ..RunSummary::default()
        };
        for stage in plan.stages() {
            match state.status(stage) {
                StageStatus::Succeeded => summary.succeeded.push(stage),
                StageStatus::Failed { reason } => summary.failed.push((stage, reason)),
                StageStatus::Skipped { reason } => summary.skipped.push((stage, reason)),
                StageStatus::Pending | StageStatus::Running => summary.pending.push(stage),
            }
        }
        summary
    }
}
