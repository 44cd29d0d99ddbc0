//! 流水线状态：阶段标识、阶段状态、各阶段结果槽位与事件日志
//!
//! PipelineState 在一次运行中只由调度器修改（某个阶段的循环返回之后）；
//! 运行结束（包括部分失败）后整体写成 JSON 快照。截图切片只在内存中保留，快照里只有 URL 与切片数。

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::llm::Usage;
use crate::memory::SnapshotStore;
use crate::react::PipelineEvent;
use crate::schemas::{
    CodeAnalysisOutput, FeasibilityOutput, Pass1Output, Pass2Output, QualityAuditOutput,
    ResearchOutput, TechStackAdvisorOutput, UxDesignOutput,
};
use crate::tools::ImageSequence;

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// 4A
    Research,
    /// 4B
    CodeAnalysis,
    /// 4C 第一遍
    RankingPass1,
    /// 4D
    Feasibility,
    /// 4E
    QualityAudit,
    /// 4G
    TechStackAdvisor,
    /// 4C 第二遍
    RankingPass2,
    /// 4F
    DesignAudit,
    /// 汇总
    Synthesis,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::Research,
        StageId::CodeAnalysis,
        StageId::RankingPass1,
        StageId::Feasibility,
        StageId::QualityAudit,
        StageId::TechStackAdvisor,
        StageId::RankingPass2,
        StageId::DesignAudit,
        StageId::Synthesis,
    ];

    /// 展示名；同时是该阶段 system prompt 中唯一的标记
    pub fn label(&self) -> &'static str {
        match self {
            StageId::Research => "Comparative Research",
            StageId::CodeAnalysis => "Code Analysis",
            StageId::RankingPass1 => "Feature Ranking",
            StageId::Feasibility => "Tech Feasibility",
            StageId::QualityAudit => "Quality Audit",
            StageId::TechStackAdvisor => "Tech Stack Advisor",
            StageId::RankingPass2 => "Feature Re-ranking",
            StageId::DesignAudit => "UX Design Audit",
            StageId::Synthesis => "Executive Synthesis",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StageId::Research => "4A",
            StageId::CodeAnalysis => "4B",
            StageId::RankingPass1 => "4C-1",
            StageId::Feasibility => "4D",
            StageId::QualityAudit => "4E",
            StageId::TechStackAdvisor => "4G",
            StageId::RankingPass2 => "4C-2",
            StageId::DesignAudit => "4F",
            StageId::Synthesis => "S",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

/// 跳过原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// 依赖的阶段失败或被跳过
    BlockedByFailedDependency(StageId),
    /// 本次运行不适用（缺目标、无功能、无截图等）
    NotApplicable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BlockedByFailedDependency(dep) => write!(f, "blocked by {dep}"),
            SkipReason::NotApplicable(why) => write!(f, "not applicable: {why}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed { reason: String },
    Skipped { reason: SkipReason },
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }

    /// 已失败或被跳过（Pending / Running 都不算）
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, StageStatus::Failed { .. } | StageStatus::Skipped { .. })
    }
}

/// 研究阶段截取的视觉证据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotEntry {
    pub url: String,
    pub tile_count: usize,
    #[serde(skip)]
    pub tiles: Vec<String>,
}

impl From<ImageSequence> for ScreenshotEntry {
    fn from(seq: ImageSequence) -> Self {
        Self {
            url: seq.source,
            tile_count: seq.tiles.len(),
            tiles: seq.tiles,
        }
    }
}

/// 事件日志条目；seq 严格递增
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: AnalysisConfig,

    #[serde(default)]
    pub research: Option<ResearchOutput>,
    #[serde(default)]
    pub code_analysis: Option<CodeAnalysisOutput>,
    #[serde(default)]
    pub pass1: Option<Pass1Output>,
    #[serde(default)]
    pub feasibility: Option<FeasibilityOutput>,
    #[serde(default)]
    pub quality_audit: Option<QualityAuditOutput>,
    #[serde(default)]
    pub tech_stack: Option<TechStackAdvisorOutput>,
    #[serde(default)]
    pub pass2: Option<Pass2Output>,
    #[serde(default)]
    pub ux_design: Option<UxDesignOutput>,
    #[serde(default)]
    pub executive_summary: Option<String>,

    /// 技术选型中评估失败的功能名
    #[serde(default)]
    pub failed_features: Vec<String>,
    #[serde(default)]
    pub screenshots: Vec<ScreenshotEntry>,
    #[serde(default)]
    pub stages: BTreeMap<StageId, StageStatus>,
    #[serde(default)]
    pub events: Vec<LoggedEvent>,
    #[serde(default)]
    pub usage: BTreeMap<StageId, Usage>,
}

impl PipelineState {
    pub fn new(config: AnalysisConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            updated_at: now,
            config,
            research: None,
            code_analysis: None,
            pass1: None,
            feasibility: None,
            quality_audit: None,
            tech_stack: None,
            pass2: None,
            ux_design: None,
            executive_summary: None,
            failed_features: Vec::new(),
            screenshots: Vec::new(),
            stages: StageId::ALL.iter().map(|s| (*s, StageStatus::Pending)).collect(),
            events: Vec::new(),
            usage: BTreeMap::new(),
        }
    }

    pub fn status(&self, stage: StageId) -> StageStatus {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    pub fn set_status(&mut self, stage: StageId, status: StageStatus) {
        self.stages.insert(stage, status);
        self.updated_at = Utc::now();
    }

    /// 追加事件，分配下一个序号
    pub fn record(&mut self, event: PipelineEvent) -> u64 {
        let seq = self.events.last().map(|e| e.seq + 1).unwrap_or(1);
        self.events.push(LoggedEvent {
            seq,
            timestamp: Utc::now(),
            event,
        });
        seq
    }

    pub fn add_usage(&mut self, stage: StageId, usage: Usage) {
        self.usage.entry(stage).or_default().add(usage);
    }

    pub fn total_usage(&self) -> Usage {
        let mut total = Usage::default();
        for u in self.usage.values() {
            total.add(*u);
        }
        total
    }

    /// 内存中可用的截图（快照加载后切片为空，不算）
    pub fn visual_evidence(&self) -> Vec<&ScreenshotEntry> {
        self.screenshots.iter().filter(|s| !s.tiles.is_empty()).collect()
    }

    /// (成功, 失败, 跳过) 阶段数
    pub fn counts(&self) -> (usize, usize, usize) {
        self.stages.values().fold((0, 0, 0), |(ok, failed, skipped), s| match s {
            StageStatus::Succeeded => (ok + 1, failed, skipped),
            StageStatus::Failed { .. } => (ok, failed + 1, skipped),
            StageStatus::Skipped { .. } => (ok, failed, skipped + 1),
            _ => (ok, failed, skipped),
        })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        SnapshotStore::new(path).save(self)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        SnapshotStore::new(path).load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PipelineState {
        PipelineState::new(AnalysisConfig::new("", "https://example.com", vec!["speed".into()]))
    }

    #[test]
    fn test_new_state_is_all_pending() {
        let s = state();
        assert!(StageId::ALL.iter().all(|id| s.status(*id) == StageStatus::Pending));
        assert_eq!(s.counts(), (0, 0, 0));
    }

    #[test]
    fn test_event_seq_strictly_increasing() {
        let mut s = state();
        let a = s.record(PipelineEvent::StageStarted { stage: StageId::Research });
        let b = s.record(PipelineEvent::StageSucceeded { stage: StageId::Research });
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn test_snapshot_round_trip_drops_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline-state.json");
        let mut s = state();
        s.screenshots.push(ScreenshotEntry::from(ImageSequence {
            source: "https://example.com".into(),
            tiles: vec!["aGVsbG8=".into(); 3],
        }));
        s.set_status(
            StageId::RankingPass1,
            StageStatus::Skipped {
                reason: SkipReason::BlockedByFailedDependency(StageId::Research),
            },
        );
        s.set_status(StageId::Research, StageStatus::Failed { reason: "boom".into() });
        s.executive_summary = Some("ok".into());
        s.record(PipelineEvent::RunStarted { run_id: s.run_id.clone() });
        s.save(&path).unwrap();

        let loaded = PipelineState::load(&path).unwrap();
        assert_eq!(loaded.screenshots[0].tile_count, 3);
        assert!(loaded.screenshots[0].tiles.is_empty());
        assert!(loaded.visual_evidence().is_empty());
        assert_eq!(loaded.status(StageId::Research), s.status(StageId::Research));
        assert_eq!(loaded.status(StageId::RankingPass1), s.status(StageId::RankingPass1));
        assert_eq!(loaded.events, s.events);
        assert_eq!(loaded.executive_summary.as_deref(), Some("ok"));
    }

    #[test]
    fn test_display_includes_code() {
        assert_eq!(StageId::TechStackAdvisor.to_string(), "Tech Stack Advisor (4G)");
        let reason = SkipReason::BlockedByFailedDependency(StageId::Research);
        assert_eq!(reason.to_string(), "blocked by Comparative Research (4A)");
    }
}
