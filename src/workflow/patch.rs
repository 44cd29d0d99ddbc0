//! 增量合并
//!
//! 读取已有快照，用快照里的分析配置只跑 [4B, 4G]，再按规范化功能名把新的技术选型评估并入旧状态：
//! 同名替换（原位置、只替换一次），新名追加，其余内容保持不变。4B 的新结果只作为本次 4G 的输入。

use std::collections::HashSet;
use std::path::Path;

use crate::core::{PipelineState, StageId, StageStatus};
use crate::react::PipelineEvent;
use crate::schemas::tech_stack::feature_key;
use crate::schemas::{TechStackAdvisorOutput, TechStackRecommendation};
use crate::workflow::engine::{feature_plan, Orchestrator, RunSummary};
use crate::workflow::types::WorkflowError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub replaced: usize,
    pub appended: usize,
}

/// 一次增量运行的结果
#[derive(Debug)]
pub struct PatchOutcome {
    pub state: PipelineState,
    pub report: MergeReport,
    pub summary: RunSummary,
}

/// 把新评估并入已有结果
///
/// 同一个键在 `fresh` 中出现多次时只取第一条。
pub fn merge_tech_stack(
    target: &mut Option<TechStackAdvisorOutput>,
    fresh: Vec<TechStackRecommendation>,
) -> MergeReport {
    let mut report = MergeReport::default();
    let mut seen = HashSet::new();
    let existing = target.get_or_insert_with(|| TechStackAdvisorOutput {
        features: Vec::new(),
        summary: String::new(),
    });

    for rec in fresh {
        let key = rec.merge_key();
        if !seen.insert(key.clone()) {
            tracing::debug!(feature = %key, "duplicate evaluation in patch result ignored");
            continue;
        }
        match existing.features.iter().position(|f| f.merge_key() == key) {
            Some(idx) => {
                existing.features[idx] = rec;
                report.replaced += 1;
            }
            None => {
                existing.features.push(rec);
                report.appended += 1;
            }
        }
    }

    if existing.summary.trim().is_empty() {
        existing.summary = format!("Evaluated {} feature(s).", existing.features.len());
    }
    report
}

/// 针对快照重新评估指定功能并写回
///
/// 传入的 Orchestrator 不应设置快照路径：子运行的临时状态不落盘，只有合并后的状态写回 `snapshot`。
pub async fn patch_features(
    orchestrator: &Orchestrator,
    snapshot: &Path,
    features: Vec<String>,
) -> Result<PatchOutcome, WorkflowError> {
    let plan = feature_plan(features)?;
    let mut prior = PipelineState::load(snapshot)
        .map_err(|e| WorkflowError::Snapshot(format!("{e:#}")))?;
    tracing::info!(
        snapshot = %snapshot.display(),
        run_id = %prior.run_id,
        features = ?plan.features,
        "patching tech stack evaluations"
    );

    let mut scratch = PipelineState::new(prior.config.clone());
    scratch.run_id = prior.run_id.clone();
    // 第一遍排名只用来给 4G 提供对标竞品
    if prior.status(StageId::RankingPass1).is_success() {
        scratch.pass1 = prior.pass1.clone();
        scratch.set_status(StageId::RankingPass1, StageStatus::Succeeded);
    }

    let summary = orchestrator.drive(&mut scratch, &plan).await?;

    let mut report = MergeReport::default();
    if scratch.status(StageId::TechStackAdvisor).is_success() {
        if let Some(fresh) = scratch.tech_stack.take() {
            report = merge_tech_stack(&mut prior.tech_stack, fresh.features);
        }
        prior.set_status(StageId::TechStackAdvisor, StageStatus::Succeeded);
    }

    let attempted: Vec<String> = plan.features.clone().unwrap_or_default();
    let still_failing: HashSet<String> = scratch.failed_features.iter().map(|f| feature_key(f)).collect();
    let evaluated = scratch.status(StageId::TechStackAdvisor).is_success();
    prior.failed_features.retain(|f| {
        let key = feature_key(f);
        let retried = attempted.iter().any(|a| feature_key(a) == key);
        !(evaluated && retried && !still_failing.contains(&key))
    });
    for failed in scratch.failed_features {
        if !prior.failed_features.iter().any(|f| feature_key(f) == feature_key(&failed)) {
            prior.failed_features.push(failed);
        }
    }

    for (stage, usage) in &scratch.usage {
        prior.add_usage(*stage, *usage);
    }
    for logged in scratch.events {
        prior.record(logged.event);
    }
    prior.record(PipelineEvent::PatchMerged {
        replaced: report.replaced,
        appended: report.appended,
    });

    prior
        .save(snapshot)
        .map_err(|e| WorkflowError::Snapshot(format!("{e:#}")))?;
    tracing::info!(
        replaced = report.replaced,
        appended = report.appended,
        failed = prior.failed_features.len(),
        "patch merged"
    );

    Ok(PatchOutcome {
        state: prior,
        report,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(requested: &str, name: &str) -> TechStackRecommendation {
        let mut r: TechStackRecommendation = serde_json::from_value(json!({
            "feature_name": name,
            "simple_approach": {"approach_name": "simple", "description": name}
        }))
        .unwrap();
        r.requested_feature = requested.into();
        r
    }

    #[test]
    fn test_merge_replaces_in_place_and_appends() {
        let mut target = Some(TechStackAdvisorOutput {
            features: vec![rec("Search", "old search"), rec("Dark mode", "old dark")],
            summary: "prior".into(),
        });
        let report = merge_tech_stack(
            &mut target,
            vec![rec("  search ", "new search"), rec("Offline", "offline")],
        );
        assert_eq!(report, MergeReport { replaced: 1, appended: 1 });

        let out = target.unwrap();
        let names: Vec<_> = out.features.iter().map(|f| f.feature_name.as_str()).collect();
        assert_eq!(names, vec!["new search", "old dark", "offline"]);
        assert_eq!(out.summary, "prior");
    }

    #[test]
    fn test_merge_into_empty_slot() {
        let mut target = None;
        let report = merge_tech_stack(&mut target, vec![rec("a", "a"), rec("A", "dup")]);
        assert_eq!(report, MergeReport { replaced: 0, appended: 1 });
        assert_eq!(target.unwrap().summary, "Evaluated 1 feature(s).");
    }
}
