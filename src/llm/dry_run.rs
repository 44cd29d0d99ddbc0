//! --dry-run：每个阶段返回一份合法的固定输出，不访问网络
//!
//! 用来验证配置、调度与报告渲染是否走得通。

use serde_json::{json, Value};

use crate::core::StageId;
use crate::llm::{AssistantTurn, ScriptStep, ScriptedTransport};

fn canned(stage: StageId) -> Value {
    match stage {
        StageId::Research => json!({
            "competitors": [
                {"name": "Dry Run Competitor", "url": "https://competitor.example", "relevance": "same audience"}
            ],
            "feature_matrix": [
                {"feature": "Search", "current_site": "basic", "competitors": {"Dry Run Competitor": "faceted"}}
            ],
            "gaps": [
                {"description": "No faceted search", "severity": "medium", "competitor_prevalence": 1,
                 "competitors_with_feature": ["Dry Run Competitor"]}
            ],
            "summary": "Dry-run research output."
        }),
        StageId::CodeAnalysis => json!({
            "tech_stack": [{"name": "React", "category": "frontend", "version": "18"}],
            "architecture": {"routing_pattern": "file-based", "data_flow": "props and context"},
            "summary": "Dry-run code analysis output."
        }),
        StageId::RankingPass1 | StageId::RankingPass2 => json!({
            "recommendations": [
                {
                    "id": "REC-001",
                    "title": "Faceted search",
                    "description": "Let users filter results by category.",
                    "category": "quick-win",
                    "scores": {"user_value": 8, "novelty": 4, "feasibility": 7, "accessibility_impact": 5},
                    "rank": 1,
                    "parity_gap": true,
                    "competitors_with_feature": ["Dry Run Competitor"]
                }
            ],
            "quick_wins": ["REC-001"],
            "summary": "Dry-run ranking."
        }),
        StageId::Feasibility => json!({
            "assessments": [
                {"recommendation_id": "REC-001", "rating": "easy", "developer_days": 3, "risk": "low"}
            ],
            "summary": "Dry-run feasibility."
        }),
        StageId::QualityAudit => json!({
            "accessibility": {"wcag_level": "AA"},
            "priority_issues": [{"description": "Missing alt text", "impact": "medium"}],
            "summary": "Dry-run quality audit."
        }),
        StageId::TechStackAdvisor => json!({
            "features": [
                {
                    "feature_name": "Dry run feature",
                    "simple_approach": {"approach_name": "simple", "description": "Reuse the existing stack."},
                    "comprehensive_approach": null,
                    "recommended_approach": "simple"
                }
            ],
            "summary": "Dry-run tech stack advice."
        }),
        StageId::DesignAudit => json!({
            "overall_impression": "Clean",
            "summary": "Dry-run design audit."
        }),
        StageId::Synthesis => Value::String("Dry-run executive summary.".into()),
    }
}

/// 为所有阶段挂好固定回复的脚本化传输
pub fn dry_run_transport() -> ScriptedTransport {
    StageId::ALL
        .iter()
        .fold(ScriptedTransport::new(), |transport, stage| {
            let text = match canned(*stage) {
                Value::String(s) => s,
                other => other.to_string(),
            };
            transport.with_route(
                stage.label(),
                vec![ScriptStep::Reply(AssistantTurn::text(text).with_usage(0, 0))],
            )
        })
}
