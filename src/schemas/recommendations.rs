//! 4C 功能推荐输出（Pass 1 初排 / Pass 2 重排）
//!
//! Pass 2 产出全新的 `Pass2Output`，不修改 Pass 1 结果，两者同时保存在 PipelineState 中。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::react::StructuredOutput;

/// 单项分数上限
pub const MAX_SCORE: u8 = 10;

/// 评分维度，每项 0..=10
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ScoreBreakdown {
    pub user_value: u8,
    pub novelty: u8,
    /// Pass 1 为估计值，Pass 2 为结合 4D 评估后的值
    pub feasibility: u8,
    pub accessibility_impact: u8,
}

impl ScoreBreakdown {
    fn check(&self, id: &str) -> Result<(), String> {
        for (axis, value) in [
            ("user_value", self.user_value),
            ("novelty", self.novelty),
            ("feasibility", self.feasibility),
            ("accessibility_impact", self.accessibility_impact),
        ] {
            if value > MAX_SCORE {
                return Err(format!(
                    "recommendation {id}: score '{axis}' is {value}, must be between 0 and {MAX_SCORE}"
                ));
            }
        }
        Ok(())
    }

    pub fn total(&self) -> u32 {
        [self.user_value, self.novelty, self.feasibility, self.accessibility_impact]
            .iter()
            .map(|v| u32::from(*v))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Recommendation {
    /// 如 "REC-001"
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    /// "quick-win" / "medium-term" / "long-term"
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub estimated_complexity: String,
    #[serde(default)]
    pub expected_impact: String,
    #[serde(default)]
    pub scores: ScoreBreakdown,
    #[serde(default)]
    pub rank: u32,
    /// 由竞品功能差距驱动的推荐
    #[serde(default)]
    pub parity_gap: bool,
    #[serde(default)]
    pub competitors_with_feature: Vec<String>,
    #[serde(default, deserialize_with = "super::lenient_string")]
    #[schemars(with = "String")]
    pub user_value_signal: String,
}

fn check_recommendations(recs: &[Recommendation]) -> Result<(), String> {
    super::check_unique_ids("recommendations", recs.iter().map(|r| r.id.as_str()))?;
    for rec in recs {
        if rec.title.trim().is_empty() {
            return Err(format!("recommendation {}: title must not be empty", rec.id));
        }
        rec.scores.check(&rec.id)?;
    }
    Ok(())
}

fn check_refs(field: &str, refs: &[String], recs: &[Recommendation]) -> Result<(), String> {
    for id in refs {
        if !recs.iter().any(|r| &r.id == id) {
            return Err(format!("{field} references unknown recommendation id '{id}'"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pass1Output {
    pub recommendations: Vec<Recommendation>,
    /// quick-win 推荐的 ID
    #[serde(default)]
    pub quick_wins: Vec<String>,
    #[serde(default)]
    pub long_term: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl StructuredOutput for Pass1Output {
    fn check(&self) -> Result<(), String> {
        if self.recommendations.is_empty() {
            return Err("recommendations must contain at least one item".into());
        }
        check_recommendations(&self.recommendations)?;
        check_refs("quick_wins", &self.quick_wins, &self.recommendations)?;
        check_refs("long_term", &self.long_term, &self.recommendations)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pass2Output {
    pub recommendations: Vec<Recommendation>,
    /// 排名上升的 ID
    #[serde(default)]
    pub promoted: Vec<String>,
    #[serde(default)]
    pub demoted: Vec<String>,
    #[serde(default)]
    pub quick_wins: Vec<String>,
    #[serde(default)]
    pub long_term: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl StructuredOutput for Pass2Output {
    fn check(&self) -> Result<(), String> {
        if self.recommendations.is_empty() {
            return Err("recommendations must contain at least one item".into());
        }
        check_recommendations(&self.recommendations)?;
        check_refs("quick_wins", &self.quick_wins, &self.recommendations)?;
        check_refs("long_term", &self.long_term, &self.recommendations)
    }
}
