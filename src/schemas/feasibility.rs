//! 4D 技术可行性输出

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::react::StructuredOutput;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProCon {
    pub point: String,
    /// "minor" / "moderate" / "major"
    #[serde(default)]
    pub weight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FeasibilityAssessment {
    pub recommendation_id: String,
    /// "easy" / "moderate" / "hard" / "requires_migration"
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub cost_estimate: String,
    /// 如 "1-2 days"；模型偶尔给整数
    #[serde(default, deserialize_with = "super::lenient_string")]
    #[schemars(with = "String")]
    pub developer_days: String,
    #[serde(default)]
    pub new_dependencies: Vec<String>,
    #[serde(default)]
    pub migration_path: String,
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub pros: Vec<ProCon>,
    #[serde(default)]
    pub cons: Vec<ProCon>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FollowUpQa {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub asked_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FeasibilityOutput {
    pub assessments: Vec<FeasibilityAssessment>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub follow_up_qa: Vec<FollowUpQa>,
}

impl StructuredOutput for FeasibilityOutput {
    fn check(&self) -> Result<(), String> {
        super::check_unique_ids(
            "assessments",
            self.assessments.iter().map(|a| a.recommendation_id.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_developer_days_integer_is_coerced() {
        let out: FeasibilityOutput = serde_json::from_str(
            r#"{"assessments": [{"recommendation_id": "REC-001", "developer_days": 3}]}"#,
        )
        .unwrap();
        assert_eq!(out.assessments[0].developer_days, "3");
        assert!(out.check().is_ok());
    }
}
