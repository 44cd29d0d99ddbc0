//! 代码搜索工具：在被分析项目中按正则搜索
//!
//! 大小写不敏感；非法正则退化为字面量匹配。跳过忽略目录、二进制与超大文件。

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Serialize;
use serde_json::{json, Value};

use crate::tools::filesystem::{SafeFs, MAX_FILE_SIZE};
use crate::tools::{Tool, ToolResult};

/// 每行最多保留的字符数
const MAX_LINE_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct SearchHit {
    file: String,
    line_number: usize,
    line: String,
}

pub struct SearchCodeTool {
    fs: SafeFs,
    max_results: usize,
}

impl SearchCodeTool {
    pub fn new(fs: SafeFs, max_results: usize) -> Self {
        Self { fs, max_results }
    }

    fn search(&self, pattern: &str) -> Vec<SearchHit> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .or_else(|_| {
                RegexBuilder::new(&regex::escape(pattern))
                    .case_insensitive(true)
                    .build()
            });
        let Ok(re) = re else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        let walker = walkdir::WalkDir::new(self.fs.root())
            .max_depth(10)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.fs.is_ignored(e.path()))
            .filter_map(|e| e.ok());

        for entry in walker {
            if !entry.file_type().is_file() || SafeFs::is_binary(entry.path()) {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            let rel = entry
                .path()
                .strip_prefix(self.fs.root())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            for (i, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(SearchHit {
                        file: rel.clone(),
                        line_number: i + 1,
                        line: line.trim_end().chars().take(MAX_LINE_CHARS).collect(),
                    });
                    if hits.len() >= self.max_results {
                        return hits;
                    }
                }
            }
        }
        hits
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search across all files in the codebase for a regex pattern. Returns matching lines with file paths and line numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regex pattern to search for (case-insensitive)."}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "missing required argument 'pattern'".to_string())?;
        tracing::debug!(pattern = %pattern, "search_code");
        let hits = self.search(pattern);
        if hits.is_empty() {
            return Ok(ToolResult::text("No matches found."));
        }
        serde_json::to_string_pretty(&hits)
            .map(ToolResult::Text)
            .map_err(|e| e.to_string())
    }
}
