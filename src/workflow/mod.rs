//! 阶段调度：依赖图、计划、调度器与增量合并

pub mod engine;
pub mod graph;
pub mod patch;
pub mod types;

pub use engine::{feature_plan, Orchestrator, RunSummary, StageExecutor, SYNTHESIS_FALLBACK};
pub use graph::StageGraph;
pub use patch::{merge_tech_stack, patch_features, MergeReport, PatchOutcome};
pub use types::*;
