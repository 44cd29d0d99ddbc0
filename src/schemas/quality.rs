//! 4E 质量审计输出（可访问性 + 性能）

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::react::StructuredOutput;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AccessibilityIssue {
    pub description: String,
    /// "critical" / "serious" / "moderate" / "minor"
    #[serde(default)]
    pub severity: String,
    /// 如 "1.1.1"
    #[serde(default, deserialize_with = "super::lenient_string")]
    #[schemars(with = "String")]
    pub wcag_criterion: String,
    #[serde(default)]
    pub element: String,
    #[serde(default)]
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerformanceMetric {
    /// 如 "LCP"、"CLS"
    pub name: String,
    #[serde(default, deserialize_with = "super::lenient_string")]
    #[schemars(with = "String")]
    pub value: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AccessibilityReport {
    pub wcag_level: String,
    pub issues: Vec<AccessibilityIssue>,
    pub keyboard_navigation: String,
    pub screen_reader_notes: String,
    pub aria_usage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PerformanceReport {
    pub metrics: Vec<PerformanceMetric>,
    pub bundle_analysis: String,
    pub image_optimization: String,
    pub caching_strategy: String,
    pub critical_rendering_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityIssue {
    pub description: String,
    /// "accessibility" / "performance"
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub effort_to_fix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QualityAuditOutput {
    pub accessibility: AccessibilityReport,
    pub performance: PerformanceReport,
    pub priority_issues: Vec<QualityIssue>,
    pub summary: String,
}

impl StructuredOutput for QualityAuditOutput {}
