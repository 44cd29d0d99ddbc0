//! 增量合并集成测试：对快照重跑 [4B, 4G] 并按功能名合并

use std::path::Path;
use std::sync::Arc;

use sea::agents::AgentStageExecutor;
use sea::config::{AnalysisConfig, AppConfig};
use sea::core::{PipelineState, StageId, StageStatus};
use sea::llm::{dry_run_transport, AssistantTurn, ScriptStep, ScriptedTransport};
use sea::react::PipelineEvent;
use sea::schemas::{
    Pass1Output, QualityAuditOutput, ResearchOutput, TechStackAdvisorOutput, TechStackRecommendation,
};
use sea::workflow::{patch_features, MergeReport, Orchestrator};
use serde_json::json;

fn evaluation(requested: &str, approach: &str) -> TechStackRecommendation {
    let mut rec: TechStackRecommendation = serde_json::from_value(json!({
        "feature_name": requested,
        "simple_approach": {"approach_name": "simple", "description": approach},
        "recommended_approach": "simple"
    }))
    .unwrap();
    rec.requested_feature = requested.into();
    rec
}

/// 与 4G 无关、合并后必须原样保留的阶段
const UNRELATED: [StageId; 3] = [StageId::Research, StageId::RankingPass1, StageId::QualityAudit];

/// 已完成一次完整运行的快照：三个功能评估 + 调研、第一遍排名、质量审计与执行摘要
fn prior_snapshot(site: &Path, snapshot: &Path) -> PipelineState {
    let mut state = PipelineState::new(AnalysisConfig::new(
        site.to_string_lossy(),
        "https://example.com",
        vec!["speed".into()],
    ));
    state.pass1 = Some(
        serde_json::from_value::<Pass1Output>(json!({"recommendations": [{
            "id": "REC-001", "title": "Search", "description": "d",
            "parity_gap": true, "competitors_with_feature": ["Rival"]
        }]}))
        .unwrap(),
    );
    state.set_status(StageId::RankingPass1, StageStatus::Succeeded);
    state.research = Some(
        serde_json::from_value::<ResearchOutput>(json!({
            "competitors": [{"name": "Rival", "url": "https://rival.example"}],
            "trends": ["command palettes"]
        }))
        .unwrap(),
    );
    state.set_status(StageId::Research, StageStatus::Succeeded);
    state.quality_audit = Some(QualityAuditOutput {
        summary: "contrast issues on the pricing page".into(),
        ..QualityAuditOutput::default()
    });
    state.set_status(StageId::QualityAudit, StageStatus::Succeeded);
    state.tech_stack = Some(TechStackAdvisorOutput {
        features: vec![
            evaluation("Search", "old search"),
            evaluation("Dark mode", "old dark mode"),
            evaluation("Offline", "old offline"),
        ],
        summary: "Evaluated 3 feature(s).".into(),
    });
    state.set_status(StageId::TechStackAdvisor, StageStatus::Succeeded);
    state.executive_summary = Some("prior summary".into());
    state.set_status(StageId::Synthesis, StageStatus::Succeeded);
    state.save(snapshot).unwrap();
    state
}

fn advisor_reply(description: &str) -> ScriptStep {
    ScriptStep::Reply(AssistantTurn::text(
        json!({"features": [{
            "feature_name": "model-chosen name",
            "simple_approach": {"approach_name": "simple", "description": description}
        }]})
        .to_string(),
    ))
}

fn orchestrator(transport: Arc<ScriptedTransport>) -> Orchestrator {
    Orchestrator::new(Arc::new(AgentStageExecutor::new(transport, AppConfig::default())))
}

#[tokio::test]
async fn test_present_key_is_replaced_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("pipeline-state.json");
    let prior = prior_snapshot(dir.path(), &snapshot);

    let transport = Arc::new(
        dry_run_transport().with_route("Tech Stack Advisor", vec![advisor_reply("new search")]),
    );
    let outcome = patch_features(&orchestrator(transport.clone()), &snapshot, vec!["  SEARCH ".into()])
        .await
        .unwrap();

    assert_eq!(outcome.report, MergeReport { replaced: 1, appended: 0 });
    let before = &prior.tech_stack.as_ref().unwrap().features;
    let after = &outcome.state.tech_stack.as_ref().unwrap().features;
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].simple_approach.description, "new search");
    assert_eq!(after[0].merge_key(), "search");
    assert_eq!(after[1..], before[1..]);

    // 第一遍排名中的对标竞品传给了 4G
    let advisor = transport.requests_for("Tech Stack Advisor");
    assert_eq!(advisor.len(), 1);
    assert!(advisor[0].messages[0].content.contains("Rival"));

    let reloaded = PipelineState::load(&snapshot).unwrap();
    assert_eq!(reloaded.tech_stack, outcome.state.tech_stack);
    assert_eq!(reloaded.executive_summary.as_deref(), Some("prior summary"));
    assert_eq!(reloaded.pass1, prior.pass1);
    // 子运行的代码分析只作输入
    assert!(reloaded.code_analysis.is_none());
    assert!(reloaded
        .events
        .iter()
        .any(|e| e.event == PipelineEvent::PatchMerged { replaced: 1, appended: 0 }));
}

#[tokio::test]
async fn test_five_new_features_leave_existing_results_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("pipeline-state.json");
    let prior = prior_snapshot(dir.path(), &snapshot);

    let transport = Arc::new(
        dry_run_transport().with_route("Tech Stack Advisor", vec![advisor_reply("fresh")]),
    );
    let names: Vec<String> = ["Export", "SSO", "Chat", "Comments", "Analytics"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let outcome = patch_features(&orchestrator(transport.clone()), &snapshot, names)
        .await
        .unwrap();

    assert_eq!(outcome.report, MergeReport { replaced: 0, appended: 5 });
    assert_eq!(transport.requests_for("Tech Stack Advisor").len(), 5);

    let reloaded = PipelineState::load(&snapshot).unwrap();
    let after = &reloaded.tech_stack.as_ref().unwrap().features;
    assert_eq!(after[..3], prior.tech_stack.as_ref().unwrap().features[..]);
    let keys: Vec<_> = after.iter().map(|f| f.merge_key()).collect();
    assert_eq!(
        keys,
        vec!["search", "dark mode", "offline", "export", "sso", "chat", "comments", "analytics"]
    );

    assert!(prior.research.is_some() && prior.pass1.is_some() && prior.quality_audit.is_some());
    assert_eq!(reloaded.research, prior.research);
    assert_eq!(reloaded.pass1, prior.pass1);
    assert_eq!(reloaded.quality_audit, prior.quality_audit);
    assert_eq!(reloaded.executive_summary, prior.executive_summary);
    for stage in UNRELATED.into_iter().chain([StageId::Synthesis]) {
        assert_eq!(reloaded.status(stage), StageStatus::Succeeded, "{stage}");
        assert_eq!(reloaded.status(stage), prior.status(stage), "{stage}");
    }
}

#[tokio::test]
async fn test_failed_feature_is_recorded_and_others_merge() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("pipeline-state.json");
    prior_snapshot(dir.path(), &snapshot);

    // 第二个功能三次都给出非 JSON，耗尽重试
    let transport = Arc::new(dry_run_transport().with_route(
        "Tech Stack Advisor",
        vec![
            advisor_reply("export plan"),
            ScriptStep::Reply(AssistantTurn::text("no idea")),
            ScriptStep::Reply(AssistantTurn::text("still no idea")),
            ScriptStep::Reply(AssistantTurn::text("sorry")),
            advisor_reply("chat plan"),
        ],
    ));
    let outcome = patch_features(
        &orchestrator(transport),
        &snapshot,
        vec!["Export".into(), "SSO".into(), "Chat".into()],
    )
    .await
    .unwrap();

    assert_eq!(outcome.report, MergeReport { replaced: 0, appended: 2 });
    assert_eq!(outcome.state.failed_features, vec!["SSO"]);
    assert_eq!(outcome.state.status(StageId::TechStackAdvisor), StageStatus::Succeeded);
    assert!(outcome
        .state
        .events
        .iter()
        .any(|e| matches!(&e.event, PipelineEvent::FeatureFailed { feature, .. } if feature == "SSO")));
}

#[tokio::test]
async fn test_missing_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(dry_run_transport());
    let err = patch_features(
        &orchestrator(transport),
        &dir.path().join("missing.json"),
        vec!["Search".into()],
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Snapshot error"));
}
