//! 工作流类型定义
//!
//! 阶段依赖表、执行计划（阶段组 + 并行 / 顺序模式）、阶段请求与阶段产出。

use std::sync::Arc;

use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::core::{PipelineState, ScreenshotEntry, StageId, StageStatus};
use crate::llm::Usage;
use crate::schemas::{
    CodeAnalysisOutput, FeasibilityOutput, Pass1Output, Pass2Output, QualityAuditOutput,
    ResearchOutput, TechStackAdvisorOutput, UxDesignOutput,
};
use crate::tools::ImageSequence;

/// 依赖类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// 上游未成功则跳过本阶段
    Required,
    /// 上游成功时作为输入，否则忽略
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub stage: StageId,
    pub kind: DepKind,
}

impl Dependency {
    pub const fn required(stage: StageId) -> Self {
        Self { stage, kind: DepKind::Required }
    }

    pub const fn optional(stage: StageId) -> Self {
        Self { stage, kind: DepKind::Optional }
    }
}

/// 阶段间的数据依赖
pub fn dependencies(stage: StageId) -> Vec<Dependency> {
    use StageId::*;
    match stage {
        Research | CodeAnalysis | Synthesis => Vec::new(),
        RankingPass1 => vec![
            Dependency::required(Research),
            Dependency::optional(CodeAnalysis),
        ],
        Feasibility | QualityAudit => vec![
            Dependency::required(RankingPass1),
            Dependency::optional(CodeAnalysis),
        ],
        TechStackAdvisor => vec![
            Dependency::optional(RankingPass1),
            Dependency::optional(CodeAnalysis),
        ],
        RankingPass2 => vec![
            Dependency::required(RankingPass1),
            Dependency::optional(Feasibility),
            Dependency::optional(QualityAudit),
        ],
        DesignAudit => vec![Dependency::required(Research)],
    }
}

/// 阶段组的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// 组内阶段同时启动，全部结束后再进入下一组
    Parallel,
    /// 严格按顺序，前一个的结果记录后才启动下一个
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup {
    pub mode: GroupMode,
    pub stages: Vec<StageId>,
}

impl StageGroup {
    pub fn parallel(stages: &[StageId]) -> Self {
        Self {
            mode: GroupMode::Parallel,
            stages: stages.to_vec(),
        }
    }

    pub fn sequential(stages: &[StageId]) -> Self {
        Self {
            mode: GroupMode::Sequential,
            stages: stages.to_vec(),
        }
    }
}

/// 一次运行的执行计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub groups: Vec<StageGroup>,
    /// 显式指定的待评估功能；None 时由配置与 Pass 1 推荐推导
    pub features: Option<Vec<String>>,
}

impl Plan {
    /// 完整两遍流水线
    ///
    /// 4D / 4E / 4G 逻辑上只依赖 Pass 1，但共享模型端点的限流上限，因此顺序执行。
    pub fn full() -> Self {
        use StageId::*;
        Self {
            groups: vec![
                StageGroup::parallel(&[Research, CodeAnalysis]),
                StageGroup::sequential(&[RankingPass1]),
                StageGroup::sequential(&[Feasibility, QualityAudit, TechStackAdvisor]),
                StageGroup::sequential(&[RankingPass2]),
                StageGroup::sequential(&[DesignAudit]),
                StageGroup::sequential(&[Synthesis]),
            ],
            features: None,
        }
    }

    /// 只跑技术选型的子流水线：先 4B 再逐个功能跑 4G
    pub fn features(names: Vec<String>) -> Self {
        Self {
            groups: vec![StageGroup::sequential(&[
                StageId::CodeAnalysis,
                StageId::TechStackAdvisor,
            ])],
            features: Some(names),
        }
    }

    /// 按执行顺序列出全部阶段
    pub fn stages(&self) -> Vec<StageId> {
        self.groups.iter().flat_map(|g| g.stages.iter().copied()).collect()
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.groups.iter().any(|g| g.stages.contains(&stage))
    }
}

/// 从已成功的上游阶段复制出来的输入
///
/// 阶段只拿到副本，不接触 PipelineState 本身。
#[derive(Debug, Clone, Default)]
pub struct Upstream {
    pub research: Option<ResearchOutput>,
    pub code_analysis: Option<CodeAnalysisOutput>,
    pub pass1: Option<Pass1Output>,
    pub feasibility: Option<FeasibilityOutput>,
    pub quality_audit: Option<QualityAuditOutput>,
    pub tech_stack: Option<TechStackAdvisorOutput>,
    pub pass2: Option<Pass2Output>,
    pub ux_design: Option<UxDesignOutput>,
    /// 仍带切片的截图（只给 4F）
    pub screenshots: Vec<ScreenshotEntry>,
    /// 失败或跳过的阶段及原因（只给汇总）
    pub unsuccessful: Vec<(StageId, String)>,
}

impl Upstream {
    /// 汇总阶段看到全部成功的结果；其他阶段只看到自己声明的依赖
    pub fn collect(state: &PipelineState, stage: StageId) -> Self {
        let deps = dependencies(stage);
        let visible = |s: StageId| {
            state.status(s).is_success()
                && (stage == StageId::Synthesis || deps.iter().any(|d| d.stage == s))
        };
        fn pick<T: Clone>(visible: bool, slot: &Option<T>) -> Option<T> {
            if visible {
                slot.clone()
            } else {
                None
            }
        }

        let screenshots = if stage == StageId::DesignAudit {
            state.visual_evidence().into_iter().cloned().collect()
        } else {
            Vec::new()
        };
        let unsuccessful = if stage == StageId::Synthesis {
            state
                .stages
                .iter()
                .filter_map(|(id, status)| match status {
                    StageStatus::Failed { reason } => Some((*id, reason.clone())),
                    StageStatus::Skipped { reason } => Some((*id, reason.to_string())),
                    _ => None,
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            research: pick(visible(StageId::Research), &state.research),
            code_analysis: pick(visible(StageId::CodeAnalysis), &state.code_analysis),
            pass1: pick(visible(StageId::RankingPass1), &state.pass1),
            feasibility: pick(visible(StageId::Feasibility), &state.feasibility),
            quality_audit: pick(visible(StageId::QualityAudit), &state.quality_audit),
            tech_stack: pick(visible(StageId::TechStackAdvisor), &state.tech_stack),
            pass2: pick(visible(StageId::RankingPass2), &state.pass2),
            ux_design: pick(visible(StageId::DesignAudit), &state.ux_design),
            screenshots,
            unsuccessful,
        }
    }
}

/// 交给执行器的一次阶段调用
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: StageId,
    pub config: Arc<AnalysisConfig>,
    pub upstream: Upstream,
    /// 4G 逐功能调用时的功能名
    pub feature: Option<String>,
}

/// 阶段产出；变体与阶段一一对应
#[derive(Debug, Clone)]
pub enum StageOutput {
    Research {
        output: ResearchOutput,
        evidence: Vec<ImageSequence>,
    },
    CodeAnalysis(CodeAnalysisOutput),
    RankingPass1(Pass1Output),
    Feasibility(FeasibilityOutput),
    QualityAudit(QualityAuditOutput),
    TechStack(TechStackAdvisorOutput),
    RankingPass2(Pass2Output),
    DesignAudit(UxDesignOutput),
    Synthesis(String),
}

impl StageOutput {
    pub fn stage(&self) -> StageId {
        match self {
            StageOutput::Research { .. } => StageId::Research,
            StageOutput::CodeAnalysis(_) => StageId::CodeAnalysis,
            StageOutput::RankingPass1(_) => StageId::RankingPass1,
            StageOutput::Feasibility(_) => StageId::Feasibility,
            StageOutput::QualityAudit(_) => StageId::QualityAudit,
            StageOutput::TechStack(_) => StageId::TechStackAdvisor,
            StageOutput::RankingPass2(_) => StageId::RankingPass2,
            StageOutput::DesignAudit(_) => StageId::DesignAudit,
            StageOutput::Synthesis(_) => StageId::Synthesis,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub output: StageOutput,
    pub usage: Usage,
}

/// 工作流错误
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{stage} depends on {dependency}, which is not part of the graph")]
    UnknownDependency { stage: StageId, dependency: StageId },
    #[error("Cyclic dependency detected")]
    CyclicDependency,
    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_plan_order() {
        let plan = Plan::full();
        assert_eq!(plan.stages().len(), StageId::ALL.len());
        assert_eq!(plan.groups[0].mode, GroupMode::Parallel);
        assert_eq!(plan.stages().last(), Some(&StageId::Synthesis));
    }

    #[test]
    fn test_feature_plan_is_b_then_g() {
        let plan = Plan::features(vec!["dark mode".into()]);
        assert_eq!(plan.stages(), vec![StageId::CodeAnalysis, StageId::TechStackAdvisor]);
        assert!(!plan.contains(StageId::Research));
    }

    #[test]
    fn test_upstream_only_sees_succeeded_dependencies() {
        let mut state = PipelineState::new(AnalysisConfig::new("", "https://example.com", vec!["a".into()]));
        state.research = Some(serde_json::from_value(serde_json::json!({"competitors": []})).unwrap());
        state.set_status(StageId::Research, StageStatus::Succeeded);

        let c1 = Upstream::collect(&state, StageId::RankingPass1);
        assert!(c1.research.is_some());
        // 4D 不依赖 4A
        let d = Upstream::collect(&state, StageId::Feasibility);
        assert!(d.research.is_none());
        // 失败的阶段即使槽位有值也不可见
        state.set_status(StageId::Research, StageStatus::Failed { reason: "x".into() });
        let c1 = Upstream::collect(&state, StageId::RankingPass1);
        assert!(c1.research.is_none());
        let s = Upstream::collect(&state, StageId::Synthesis);
        assert_eq!(s.unsuccessful, vec![(StageId::Research, "x".to_string())]);
    }
}
