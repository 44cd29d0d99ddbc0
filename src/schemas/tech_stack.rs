//! 4G 技术选型顾问输出（逐功能评估，含 Mermaid 架构图）

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::react::StructuredOutput;

fn graph_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^graph\s+(TD|LR|BT|RL)").expect("static regex"))
}

/// 规范化模型生成的 Mermaid 源码
///
/// `graph TD` 改写为 `flowchart TD`；单行、以分号分隔的语句拆成多行（方括号 / 圆括号内的分号保留）。
pub fn normalize_mermaid(source: &str) -> String {
    let s = source.trim();
    let s = graph_header().replace(s, "flowchart $1").into_owned();
    if s.contains('\n') {
        return s;
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    for ch in s.chars() {
        match ch {
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(ch);
            }
            ';' if depth == 0 => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    lines.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        lines.push(tail.to_string());
    }
    lines.join("\n    ")
}

fn mermaid_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_mermaid(&raw))
}

/// 某一阶段（current / simple / comprehensive）的架构图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArchitectureDiagram {
    pub title: String,
    /// "current" / "simple" / "comprehensive"
    pub phase: String,
    #[serde(deserialize_with = "mermaid_source")]
    pub mermaid: String,
    /// 面向非技术读者的说明
    pub summary: String,
    #[serde(default)]
    pub components_to_keep: Vec<String>,
    #[serde(default)]
    pub components_with_issues: Vec<String>,
    #[serde(default)]
    pub components_to_modify: Vec<String>,
    #[serde(default)]
    pub new_components: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TechApproach {
    /// "simple" / "comprehensive"
    pub approach_name: String,
    pub description: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub new_dependencies: Vec<String>,
    /// "fits_as_is" / "minor_changes" / "major_changes" / "requires_migration"
    #[serde(default)]
    pub architecture_fit: String,
    #[serde(default)]
    pub architecture_changes: Vec<String>,
    #[serde(default, deserialize_with = "super::lenient_string")]
    #[schemars(with = "String")]
    pub effort_estimate: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
}

/// 单个功能的技术选型评估；增量合并以 `merge_key` 为键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TechStackRecommendation {
    pub feature_name: String,
    /// 调度器写入的原始请求功能名（模型可能把长问题概括成短名）
    #[serde(default)]
    #[schemars(skip)]
    pub requested_feature: String,
    /// 已实现该功能的竞品
    #[serde(default)]
    pub parity_source: Vec<String>,
    pub simple_approach: TechApproach,
    /// 与 simple 无实质差异时为 null
    #[serde(default)]
    pub comprehensive_approach: Option<TechApproach>,
    #[serde(default)]
    pub recommended_approach: String,
    #[serde(default)]
    pub recommendation_rationale: String,
    #[serde(default)]
    pub current_stack_compatibility: String,
    #[serde(default)]
    pub diagrams: Vec<ArchitectureDiagram>,
}

/// 功能名规范化：去首尾空白、折叠内部空白、小写
pub fn feature_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl TechStackRecommendation {
    pub fn merge_key(&self) -> String {
        if self.requested_feature.trim().is_empty() {
            feature_key(&self.feature_name)
        } else {
            feature_key(&self.requested_feature)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TechStackAdvisorOutput {
    pub features: Vec<TechStackRecommendation>,
    #[serde(default)]
    pub summary: String,
}

impl StructuredOutput for TechStackAdvisorOutput {
    fn check(&self) -> Result<(), String> {
        if self.features.is_empty() {
            return Err("features must contain at least one evaluation".into());
        }
        if let Some(f) = self.features.iter().find(|f| f.feature_name.trim().is_empty()) {
            return Err(format!(
                "feature evaluation with approach '{}' has an empty feature_name",
                f.simple_approach.approach_name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mermaid_single_line() {
        let src = "graph TD; A[Web; App] --> B(API); B --> C";
        assert_eq!(
            normalize_mermaid(src),
            "flowchart TD\n    A[Web; App] --> B(API)\n    B --> C"
        );
    }

    #[test]
    fn test_normalize_mermaid_multiline_only_rewrites_header() {
        let src = "graph LR\n  A --> B;\n  B --> C";
        assert_eq!(normalize_mermaid(src), "flowchart LR\n  A --> B;\n  B --> C");
    }

    #[test]
    fn test_diagram_deserialize_normalizes() {
        let d: ArchitectureDiagram = serde_json::from_str(
            r#"{"title": "Current", "phase": "current", "mermaid": "graph TD; A-->B", "summary": "s"}"#,
        )
        .unwrap();
        assert_eq!(d.mermaid, "flowchart TD\n    A-->B");
    }

    #[test]
    fn test_feature_key_normalizes() {
        assert_eq!(feature_key("  Dark   Mode "), "dark mode");
    }
}
