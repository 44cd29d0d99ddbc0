//! 报告：从 PipelineState 只读派生的 ReportBundle 与 Markdown 渲染
//!
//! 渲染不依赖任何阶段执行，快照加载后即可单独调用。

pub mod markdown;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::AnalysisConfig;
use crate::core::{AgentError, PipelineState, ScreenshotEntry, StageId, StageStatus};
use crate::llm::Usage;
use crate::schemas::{
    CodeAnalysisOutput, FeasibilityOutput, Pass1Output, Pass2Output, QualityAuditOutput,
    Recommendation, ResearchOutput, TechStackAdvisorOutput, UxDesignOutput,
};
use crate::workflow::SYNTHESIS_FALLBACK;

pub use markdown::{render_markdown, render_patch_report};

/// 报告文件名
pub const REPORT_FILE: &str = "evolution-report.md";

/// 最终采用的推荐排名（第二遍优先）
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRecommendations {
    /// 1 或 2
    pub pass: u8,
    pub recommendations: Vec<Recommendation>,
    pub quick_wins: Vec<String>,
    pub long_term: Vec<String>,
    pub promoted: Vec<String>,
    pub demoted: Vec<String>,
    pub summary: String,
}

impl From<&Pass1Output> for RankedRecommendations {
    fn from(p: &Pass1Output) -> Self {
        Self {
            pass: 1,
            recommendations: p.recommendations.clone(),
            quick_wins: p.quick_wins.clone(),
            long_term: p.long_term.clone(),
            promoted: Vec::new(),
            demoted: Vec::new(),
            summary: p.summary.clone(),
        }
    }
}

impl From<&Pass2Output> for RankedRecommendations {
    fn from(p: &Pass2Output) -> Self {
        Self {
            pass: 2,
            recommendations: p.recommendations.clone(),
            quick_wins: p.quick_wins.clone(),
            long_term: p.long_term.clone(),
            promoted: p.promoted.clone(),
            demoted: p.demoted.clone(),
            summary: p.summary.clone(),
        }
    }
}

/// 把可行性评估里的第一遍编号按标题映射到第二遍编号，并按新编号排序
///
/// 建不出任何映射时原样返回。
pub fn remap_feasibility(
    feasibility: &FeasibilityOutput,
    pass1: &Pass1Output,
    pass2: &Pass2Output,
) -> FeasibilityOutput {
    let new_ids: HashMap<&str, &str> = pass2
        .recommendations
        .iter()
        .map(|r| (r.title.as_str(), r.id.as_str()))
        .collect();
    let id_map: HashMap<&str, &str> = pass1
        .recommendations
        .iter()
        .filter_map(|r| new_ids.get(r.title.as_str()).map(|new| (r.id.as_str(), *new)))
        .collect();
    if id_map.is_empty() {
        tracing::warn!("could not map feasibility ids from pass 1 to pass 2");
        return feasibility.clone();
    }

    let mut remapped = feasibility.clone();
    for a in &mut remapped.assessments {
        if let Some(new) = id_map.get(a.recommendation_id.as_str()) {
            a.recommendation_id = (*new).to_string();
        }
    }
    remapped
        .assessments
        .sort_by(|a, b| a.recommendation_id.cmp(&b.recommendation_id));
    remapped
}

/// 报告所需的全部数据
#[derive(Debug, Clone)]
pub struct ReportBundle {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub config: AnalysisConfig,
    pub research: Option<ResearchOutput>,
    pub code_analysis: Option<CodeAnalysisOutput>,
    pub recommendations: Option<RankedRecommendations>,
    pub feasibility: Option<FeasibilityOutput>,
    pub quality_audit: Option<QualityAuditOutput>,
    pub tech_stack: Option<TechStackAdvisorOutput>,
    pub ux_design: Option<UxDesignOutput>,
    pub executive_summary: String,
    pub screenshots: Vec<ScreenshotEntry>,
    pub failed_features: Vec<String>,
    /// 各阶段最终状态，用于标注缺失章节
    pub stages: BTreeMap<StageId, StageStatus>,
    pub usage: Usage,
}

impl ReportBundle {
    pub fn from_state(state: &PipelineState) -> Self {
        let pass1 = state.pass1.as_ref().filter(|_| state.status(StageId::RankingPass1).is_success());
        let pass2 = state.pass2.as_ref().filter(|_| state.status(StageId::RankingPass2).is_success());
        let recommendations = pass2
            .map(RankedRecommendations::from)
            .or_else(|| pass1.map(RankedRecommendations::from));
        let feasibility = match (&state.feasibility, pass1, pass2) {
            (Some(f), Some(p1), Some(p2)) => Some(remap_feasibility(f, p1, p2)),
            (f, _, _) => f.clone(),
        };

        Self {
            run_id: state.run_id.clone(),
            generated_at: Utc::now(),
            config: state.config.clone(),
            research: state.research.clone(),
            code_analysis: state.code_analysis.clone(),
            recommendations,
            feasibility,
            quality_audit: state.quality_audit.clone(),
            tech_stack: state.tech_stack.clone(),
            ux_design: state.ux_design.clone(),
            executive_summary: state
                .executive_summary
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| SYNTHESIS_FALLBACK.to_string()),
            screenshots: state.screenshots.clone(),
            failed_features: state.failed_features.clone(),
            stages: state.stages.clone(),
            usage: state.total_usage(),
        }
    }

    pub fn status(&self, stage: StageId) -> StageStatus {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    /// 阶段没有成功完成时的说明
    pub fn unavailable(&self, stage: StageId) -> Option<String> {
        match self.status(stage) {
            StageStatus::Succeeded => None,
            StageStatus::Failed { reason } => Some(format!("failed: {reason}")),
            StageStatus::Skipped { reason } => Some(format!("skipped ({reason})")),
            StageStatus::Pending | StageStatus::Running => Some("did not run".into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        StageId::ALL.iter().all(|s| self.unavailable(*s).is_none())
    }
}

/// 渲染并写入 `{dir}/evolution-report.md`
pub fn write_report(state: &PipelineState, dir: &Path) -> Result<PathBuf, AgentError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AgentError::Persistence(format!("create {}: {e}", dir.display())))?;
    let path = dir.join(REPORT_FILE);
    let content = render_markdown(&ReportBundle::from_state(state));
    std::fs::write(&path, content)
        .map_err(|e| AgentError::Persistence(format!("write {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pass1() -> Pass1Output {
        serde_json::from_value(json!({"recommendations": [
            {"id": "REC-001", "title": "Search", "description": "d"},
            {"id": "REC-002", "title": "Dark mode", "description": "d"},
            {"id": "REC-003", "title": "Offline", "description": "d"}
        ]}))
        .unwrap()
    }

    fn feasibility() -> FeasibilityOutput {
        serde_json::from_value(json!({"assessments": [
            {"recommendation_id": "REC-001", "rating": "easy"},
            {"recommendation_id": "REC-002", "rating": "hard"},
            {"recommendation_id": "REC-003", "rating": "moderate"}
        ]}))
        .unwrap()
    }

    #[test]
    fn test_remap_feasibility_follows_titles() {
        let pass2: Pass2Output = serde_json::from_value(json!({"recommendations": [
            {"id": "REC-001", "title": "Offline", "description": "d"},
            {"id": "REC-002", "title": "Search", "description": "d"},
            {"id": "REC-003", "title": "Dark mode", "description": "d"}
        ]}))
        .unwrap();
        let out = remap_feasibility(&feasibility(), &pass1(), &pass2);
        let pairs: Vec<_> = out
            .assessments
            .iter()
            .map(|a| (a.recommendation_id.as_str(), a.rating.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("REC-001", "moderate"), ("REC-002", "easy"), ("REC-003", "hard")]
        );
    }

    #[test]
    fn test_remap_without_overlap_is_identity() {
        let pass2: Pass2Output = serde_json::from_value(json!({"recommendations": [
            {"id": "REC-001", "title": "Something else", "description": "d"}
        ]}))
        .unwrap();
        assert_eq!(remap_feasibility(&feasibility(), &pass1(), &pass2), feasibility());
    }

    #[test]
    fn test_bundle_prefers_pass2_and_falls_back_summary() {
        let mut state = PipelineState::new(AnalysisConfig::new("", "https://example.com", vec!["speed".into()]));
        state.pass1 = Some(pass1());
        state.set_status(StageId::RankingPass1, StageStatus::Succeeded);
        state.set_status(StageId::RankingPass2, StageStatus::Failed { reason: "timeout".into() });

        let bundle = ReportBundle::from_state(&state);
        assert_eq!(bundle.recommendations.as_ref().map(|r| r.pass), Some(1));
        assert_eq!(bundle.executive_summary, SYNTHESIS_FALLBACK);
        assert_eq!(
            bundle.unavailable(StageId::RankingPass2).as_deref(),
            Some("failed: timeout")
        );
        assert!(!bundle.is_complete());
    }
}
