//! read_manifest：读取项目清单文件
//!
//! 依次查找常见清单，原文拼接返回；能解析的（package.json / Cargo.toml / pyproject.toml）
//! 额外给出一行摘要（名称、版本、依赖数）。

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::filesystem::SafeFs;
use crate::tools::{Tool, ToolResult};

const MANIFESTS: &[&str] = &[
    "package.json",
    "pyproject.toml",
    "Cargo.toml",
    "go.mod",
    "composer.json",
    "Gemfile",
    "pom.xml",
    "build.gradle",
];

/// 从已解析的清单中提取摘要
fn summarize(name: &str, content: &str) -> Option<String> {
    match name {
        "package.json" | "composer.json" => {
            let v: Value = serde_json::from_str(content).ok()?;
            let deps = ["dependencies", "devDependencies", "require"]
                .iter()
                .filter_map(|k| v.get(*k).and_then(|d| d.as_object()))
                .map(|d| d.len())
                .sum::<usize>();
            Some(format!(
                "name={} version={} dependencies={deps}",
                v.get("name").and_then(|n| n.as_str()).unwrap_or("?"),
                v.get("version").and_then(|n| n.as_str()).unwrap_or("?"),
            ))
        }
        "Cargo.toml" | "pyproject.toml" => {
            let v: toml::Value = toml::from_str(content).ok()?;
            let package = v.get("package").or_else(|| v.get("project"))?;
            let deps = v
                .get("dependencies")
                .and_then(|d| d.as_table())
                .map(|d| d.len())
                .or_else(|| {
                    package
                        .get("dependencies")
                        .and_then(|d| d.as_array())
                        .map(|d| d.len())
                })
                .unwrap_or(0);
            Some(format!(
                "name={} version={} dependencies={deps}",
                package.get("name").and_then(|n| n.as_str()).unwrap_or("?"),
                package.get("version").and_then(|n| n.as_str()).unwrap_or("?"),
            ))
        }
        _ => None,
    }
}

pub struct ReadManifestTool {
    fs: SafeFs,
}

impl ReadManifestTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    fn read_all(&self) -> String {
        let mut found = Vec::new();
        for name in MANIFESTS {
            let path = self.fs.root().join(name);
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let content = String::from_utf8_lossy(&bytes);
            let header = match summarize(name, &content) {
                Some(summary) => format!("=== {name} ({summary}) ==="),
                None => format!("=== {name} ==="),
            };
            found.push(format!("{header}\n{content}"));
        }
        if found.is_empty() {
            "No manifest file found.".to_string()
        } else {
            found.join("\n\n")
        }
    }
}

#[async_trait]
impl Tool for ReadManifestTool {
    fn name(&self) -> &str {
        "read_manifest"
    }

    fn description(&self) -> &str {
        "Read the project manifest file (package.json, pyproject.toml, etc.)."
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
        Ok(ToolResult::Text(self.read_all()))
    }
}
