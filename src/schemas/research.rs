//! 4A 竞品调研输出

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::react::StructuredOutput;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompetitorProfile {
    pub name: String,
    pub url: String,
    /// 为什么适合作为对照
    #[serde(default)]
    pub relevance: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// 功能矩阵中的一行；取值 "yes" / "no" / "partial"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FeatureMatrixEntry {
    pub feature: String,
    #[serde(default)]
    pub current_site: String,
    #[serde(default)]
    pub competitors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UxPattern {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub seen_in: Vec<String>,
    #[serde(default)]
    pub relevance: String,
}

/// 当前站点缺失的功能
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GapItem {
    pub description: String,
    #[serde(default)]
    pub severity: String,
    /// 用户依赖程度："low" / "medium" / "high"
    #[serde(default)]
    pub user_value: String,
    #[serde(default)]
    pub competitor_prevalence: u32,
    #[serde(default)]
    pub competitors_with_feature: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DesignSystemReference {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchOutput {
    pub competitors: Vec<CompetitorProfile>,
    #[serde(default)]
    pub feature_matrix: Vec<FeatureMatrixEntry>,
    #[serde(default)]
    pub ux_patterns: Vec<UxPattern>,
    #[serde(default)]
    pub gaps: Vec<GapItem>,
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub design_systems: Vec<DesignSystemReference>,
    #[serde(default)]
    pub summary: String,
}

impl ResearchOutput {
    pub fn competitor_names(&self) -> Vec<String> {
        self.competitors.iter().map(|c| c.name.clone()).collect()
    }
}

impl StructuredOutput for ResearchOutput {
    fn check(&self) -> Result<(), String> {
        if let Some(c) = self.competitors.iter().find(|c| c.name.trim().is_empty()) {
            return Err(format!("competitor with url '{}' has an empty name", c.url));
        }
        Ok(())
    }
}
