//! 4B 代码分析输出

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::react::StructuredOutput;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TechStackItem {
    pub name: String,
    /// 如 "framework"、"styling"、"state-management"
    pub category: String,
    #[serde(default, deserialize_with = "super::lenient_string")]
    #[schemars(with = "String")]
    pub version: String,
    #[serde(default)]
    pub ux_pros: Vec<String>,
    #[serde(default)]
    pub ux_cons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComponentInfo {
    pub name: String,
    pub file_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub has_tests: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TechDebtItem {
    pub description: String,
    pub severity: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ArchitectureOverview {
    pub routing_pattern: String,
    pub data_flow: String,
    pub component_tree_summary: String,
    pub mermaid_diagram: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtensibilityReport {
    pub overall_score: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DesignSystemAnalysis {
    pub has_design_system: bool,
    pub semantic_tokens: Vec<String>,
    pub theming_support: String,
    pub animation_patterns: Vec<String>,
    pub component_library: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CodeAnalysisOutput {
    pub tech_stack: Vec<TechStackItem>,
    pub architecture: ArchitectureOverview,
    #[serde(default)]
    pub components: Vec<ComponentInfo>,
    #[serde(default)]
    pub tech_debt: Vec<TechDebtItem>,
    #[serde(default)]
    pub extensibility: ExtensibilityReport,
    #[serde(default)]
    pub design_system: DesignSystemAnalysis,
    #[serde(default)]
    pub bundle_notes: String,
    #[serde(default)]
    pub summary: String,
}

impl CodeAnalysisOutput {
    /// 下游阶段只需要技术栈、架构与债务概览；组件清单与设计系统细节体积大，裁掉
    pub fn slim(&self) -> Self {
        Self {
            components: Vec::new(),
            design_system: DesignSystemAnalysis::default(),
            bundle_notes: String::new(),
            ..self.clone()
        }
    }

    /// "name version" 列表，供 prompt 中简述当前技术栈
    pub fn stack_summary(&self) -> Vec<String> {
        self.tech_stack
            .iter()
            .map(|t| {
                if t.version.is_empty() {
                    t.name.clone()
                } else {
                    format!("{} {}", t.name, t.version)
                }
            })
            .collect()
    }
}

impl StructuredOutput for CodeAnalysisOutput {}
