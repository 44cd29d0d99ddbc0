//! 调度器集成测试：依赖阻断、并行耗时、取消与部分失败后的报告

use std::sync::Arc;
use std::time::Duration;

use sea::agents::AgentStageExecutor;
use sea::config::{AnalysisConfig, AppConfig};
use sea::core::{LlmError, PipelineState, SessionSupervisor, SkipReason, StageId, StageStatus};
use sea::llm::{dry_run_transport, ScriptStep, ScriptedTransport};
use sea::react::PipelineEvent;
use sea::report::{render_markdown, ReportBundle};
use sea::workflow::{Orchestrator, Plan, StageGroup};

fn orchestrator(transport: ScriptedTransport) -> Orchestrator {
    let executor = AgentStageExecutor::new(Arc::new(transport), AppConfig::default());
    Orchestrator::new(Arc::new(executor))
}

fn url_only() -> PipelineState {
    PipelineState::new(AnalysisConfig::new("", "https://example.com", vec!["speed".into()]))
}

#[tokio::test]
async fn test_research_failure_blocks_ranking() {
    let transport = dry_run_transport().with_route(
        "Comparative Research",
        vec![ScriptStep::Fail(LlmError::Api("upstream 500".into()))],
    );
    let mut state = url_only();
    let summary = orchestrator(transport).run(&mut state).await.unwrap();

    assert!(matches!(state.status(StageId::Research), StageStatus::Failed { .. }));
    assert!(matches!(
        state.status(StageId::CodeAnalysis),
        StageStatus::Skipped { reason: SkipReason::NotApplicable(_) }
    ));
    assert_eq!(
        state.status(StageId::RankingPass1),
        StageStatus::Skipped {
            reason: SkipReason::BlockedByFailedDependency(StageId::Research)
        }
    );
    assert!(state.pass1.is_none());
    assert!(state.research.is_none());
    assert_eq!(
        state.status(StageId::RankingPass2),
        StageStatus::Skipped {
            reason: SkipReason::BlockedByFailedDependency(StageId::RankingPass1)
        }
    );
    // 汇总总是运行
    assert_eq!(state.status(StageId::Synthesis), StageStatus::Succeeded);
    assert_eq!(summary.failed.len(), 1);

    let md = render_markdown(&ReportBundle::from_state(&state));
    assert!(md.contains("Comparative Research (4A) failed"));
    assert!(md.contains("Feature Ranking (4C-1) skipped (blocked by Comparative Research (4A))"));
    assert!(md.contains("Dry-run executive summary."));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_group_takes_the_longest_branch() {
    let dir = tempfile::tempdir().unwrap();
    let transport = dry_run_transport()
        .with_delay("Comparative Research", Duration::from_secs(10))
        .with_delay("Code Analysis", Duration::from_secs(6));
    let mut state = PipelineState::new(AnalysisConfig::new(
        dir.path().to_string_lossy(),
        "https://example.com",
        vec!["speed".into()],
    ));
    let plan = Plan {
        groups: vec![StageGroup::parallel(&[StageId::Research, StageId::CodeAnalysis])],
        features: None,
    };

    let started = tokio::time::Instant::now();
    orchestrator(transport).run_plan(&mut state, &plan).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(state.status(StageId::Research), StageStatus::Succeeded);
    assert_eq!(state.status(StageId::CodeAnalysis), StageStatus::Succeeded);
    assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(16), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_reverts_running_stage_to_pending() {
    let dir = tempfile::tempdir().unwrap();
    let transport = dry_run_transport().with_route("Comparative Research", vec![ScriptStep::Hang]);
    let supervisor = SessionSupervisor::new();
    let orchestrator = orchestrator(transport).with_supervisor(supervisor.clone());
    let mut state = PipelineState::new(AnalysisConfig::new(
        dir.path().to_string_lossy(),
        "https://example.com",
        vec!["speed".into()],
    ));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        supervisor.cancel();
    });
    let summary = orchestrator.run(&mut state).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(state.status(StageId::Research), StageStatus::Pending);
    assert!(state.research.is_none());
    // 同组已在运行的兄弟阶段照常完成
    assert_eq!(state.status(StageId::CodeAnalysis), StageStatus::Succeeded);
    // 取消后不再启动新的组
    assert_eq!(state.status(StageId::RankingPass1), StageStatus::Pending);
    assert_eq!(state.status(StageId::Synthesis), StageStatus::Pending);
    assert!(state
        .events
        .iter()
        .any(|e| e.event == PipelineEvent::StageCancelled { stage: StageId::Research }));
}

#[tokio::test]
async fn test_dry_run_completes_and_persists_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let site = dir.path().join("site");
    std::fs::create_dir_all(&site).unwrap();
    let snapshot = dir.path().join("pipeline-state.json");

    let mut config = AnalysisConfig::new(site.to_string_lossy(), "https://example.com", vec!["speed".into()]);
    config.features = vec!["dark mode".into()];
    let mut state = PipelineState::new(config);
    let summary = orchestrator(dry_run_transport())
        .with_snapshot_path(&snapshot)
        .run(&mut state)
        .await
        .unwrap();

    // 4F 没有截图可看
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.failed.is_empty());
    let keys: Vec<_> = state
        .tech_stack
        .as_ref()
        .unwrap()
        .features
        .iter()
        .map(|f| f.merge_key())
        .collect();
    assert_eq!(keys, vec!["dark mode", "faceted search"]);

    let loaded = PipelineState::load(&snapshot).unwrap();
    assert_eq!(loaded.status(StageId::RankingPass2), StageStatus::Succeeded);
    assert_eq!(loaded.events.len(), state.events.len());
    assert!(matches!(
        loaded.events.last().map(|e| &e.event),
        Some(PipelineEvent::RunFinished { .. })
    ));
}
