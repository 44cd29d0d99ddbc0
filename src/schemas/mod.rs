//! 各阶段的结构化输出类型
//!
//! 均派生 serde + schemars：反序列化即校验（缺字段 / 类型错误为硬失败），
//! JSON Schema 注入各阶段 system prompt。语义约束（分数范围、ID 唯一等）见各类型的 `check`。

pub mod code_analysis;
pub mod feasibility;
pub mod quality;
pub mod recommendations;
pub mod research;
pub mod tech_stack;
pub mod ux_design;

pub use code_analysis::CodeAnalysisOutput;
pub use feasibility::{FeasibilityAssessment, FeasibilityOutput};
pub use quality::QualityAuditOutput;
pub use recommendations::{Pass1Output, Pass2Output, Recommendation, ScoreBreakdown};
pub use research::ResearchOutput;
pub use tech_stack::{TechApproach, TechStackAdvisorOutput, TechStackRecommendation};
pub use ux_design::UxDesignOutput;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 宽松字符串：模型有时把 "3" 写成 3，数字 / 布尔一律转字符串，null 视为空串
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {other}"
        ))),
    }
}

/// ID 列表非空且不重复
pub(crate) fn check_unique_ids<'a>(
    what: &str,
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(format!("{what}: id must not be empty"));
        }
        if !seen.insert(id) {
            return Err(format!("{what}: duplicate id '{id}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "lenient_string")]
        value: String,
    }

    #[test]
    fn test_lenient_string_coerces_numbers() {
        let h: Holder = serde_json::from_str(r#"{"value": 3}"#).unwrap();
        assert_eq!(h.value, "3");
        let h: Holder = serde_json::from_str(r#"{"value": null}"#).unwrap();
        assert_eq!(h.value, "");
        let h: Holder = serde_json::from_str(r#"{"value": true}"#).unwrap();
        assert_eq!(h.value, "true");
        assert!(serde_json::from_str::<Holder>(r#"{"value": [1]}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"value": {"weeks": 2}}"#).is_err());
    }

    #[test]
    fn test_check_unique_ids() {
        assert!(check_unique_ids("recs", ["REC-001", "REC-002"]).is_ok());
        assert!(check_unique_ids("recs", ["REC-001", "REC-001"]).is_err());
        assert!(check_unique_ids("recs", [" "]).is_err());
    }
}
