//! 4F 视觉 / 交互设计审计输出

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::react::StructuredOutput;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LayoutAssessment {
    pub visual_hierarchy: String,
    pub whitespace_usage: String,
    pub grid_consistency: String,
    pub responsive_notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TypographyAssessment {
    pub readability: String,
    pub hierarchy: String,
    pub consistency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ColorAssessment {
    pub palette_coherence: String,
    pub contrast_notes: String,
    pub brand_consistency: String,
    pub dark_mode_notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NavigationAssessment {
    pub clarity: String,
    pub information_architecture: String,
    pub mobile_notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UxDesignIssue {
    /// "layout" / "typography" / "color" / "navigation" / "interaction"
    #[serde(default)]
    pub area: String,
    pub description: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub competitors_doing_better: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct UxDesignOutput {
    pub layout: LayoutAssessment,
    pub typography: TypographyAssessment,
    pub color: ColorAssessment,
    pub navigation: NavigationAssessment,
    pub issues: Vec<UxDesignIssue>,
    pub strengths: Vec<String>,
    pub overall_impression: String,
    pub summary: String,
}

impl StructuredOutput for UxDesignOutput {}
