//! 沙箱代码库读取
//!
//! SafeFs 绑定被分析项目的根目录，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸），
//! 并跳过依赖 / 构建目录、.gitignore 命中项与二进制文件。
//! ListDirTool / ReadFileTool / GetTreeTool 基于 SafeFs 提供给 4B / 4D / 4G 阶段。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::tools::{Tool, ToolResult};

/// 永远不读的目录
const ALWAYS_IGNORE: &[&str] = &[
    ".git", "node_modules", "__pycache__", ".next", ".nuxt", "dist", "build", ".cache", ".turbo",
    "coverage", ".pytest_cache", ".mypy_cache", ".venv", "venv", "target",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "svg", "webp", "avif", "woff", "woff2", "ttf", "eot", "otf",
    "zip", "tar", "gz", "br", "mp4", "webm", "mp3", "wav", "pdf", "doc", "docx", "pyc", "pyo", "so",
    "dll", "dylib", "lock",
];

/// 单文件大小上限（1MB）
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;
/// read_file 默认最多返回的行数
const MAX_LINES: usize = 500;
/// get_tree 深度
const TREE_DEPTH: usize = 3;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
    ignore: Vec<glob::Pattern>,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        let ignore = load_gitignore(&root_dir);
        Self { root_dir, ignore }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 检查路径是否在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim().trim_start_matches("./");
        let full = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.root_dir.join(path)
        };
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {path}")))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root_dir).unwrap_or(path)
    }

    /// 依赖 / 构建目录与 .gitignore 命中项
    pub fn is_ignored(&self, path: &Path) -> bool {
        let rel = self.relative(path);
        if rel
            .components()
            .any(|c| ALWAYS_IGNORE.contains(&c.as_os_str().to_string_lossy().as_ref()))
        {
            return true;
        }
        let rel_str = rel.to_string_lossy();
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.ignore
            .iter()
            .any(|p| p.matches(&rel_str) || p.matches(&name))
    }

    pub fn is_binary(path: &Path) -> bool {
        path.extension()
            .map(|e| BINARY_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn read_file(&self, path: &str, max_chars: usize) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(AgentError::ToolExecutionFailed(format!("Not a file: {path}")));
        }
        if Self::is_binary(&resolved) {
            let ext = resolved.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
            return Ok(format!("[binary file: .{ext}]"));
        }
        let size = std::fs::metadata(&resolved).map(|m| m.len()).unwrap_or(0);
        if size > MAX_FILE_SIZE {
            return Ok(format!("[file too large: {size} bytes]"));
        }
        let bytes = std::fs::read(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {e}")))?;
        let text = String::from_utf8_lossy(&bytes);

        let total_lines = text.lines().count();
        let mut out: String = text.lines().take(MAX_LINES).collect::<Vec<_>>().join("\n");
        if total_lines > MAX_LINES {
            out.push_str(&format!("\n[... truncated, {} more lines]", total_lines - MAX_LINES));
        }
        if out.chars().count() > max_chars {
            out = out.chars().take(max_chars).collect::<String>() + "\n[... truncated]";
        }
        Ok(out)
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = self.resolve(path)?;
        if !base.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!("Not a directory: {path}")));
        }
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {e}")))?
        {
            let e = e.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            if self.is_ignored(&e.path()) {
                continue;
            }
            let name = e.file_name().to_string_lossy().to_string();
            let marker = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                "/"
            } else {
                ""
            };
            entries.push(format!("{name}{marker}"));
        }
        entries.sort();
        Ok(entries)
    }

    /// 缩进目录树（最多 TREE_DEPTH 层）
    pub fn tree(&self) -> String {
        let mut lines = Vec::new();
        let walker = walkdir::WalkDir::new(&self.root_dir)
            .min_depth(1)
            .max_depth(TREE_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e.path()));
        for entry in walker.filter_map(|e| e.ok()) {
            let indent = "  ".repeat(entry.depth() - 1);
            let marker = if entry.file_type().is_dir() { "/" } else { "" };
            lines.push(format!("{indent}{}{marker}", entry.file_name().to_string_lossy()));
        }
        lines.join("\n")
    }
}

/// .gitignore 中的简单 glob 规则（不支持取反）
fn load_gitignore(root: &Path) -> Vec<glob::Pattern> {
    let Ok(content) = std::fs::read_to_string(root.join(".gitignore")) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .filter_map(|l| glob::Pattern::new(l.trim_matches('/')).ok())
        .collect()
}

fn path_arg<'a>(args: &'a Value, default: &'a str) -> &'a str {
    args.get("path").and_then(|v| v.as_str()).unwrap_or(default)
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": description}
        },
        "required": ["path"]
    })
}

/// list_dir：列出目录直接子项
pub struct ListDirTool {
    fs: SafeFs,
}

impl ListDirTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory in the codebase. Returns file and directory names."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Relative path from the codebase root. Use '.' for the root directory.")
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = path_arg(&args, ".");
        tracing::debug!(path = %path, "list_dir");
        let entries = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        Ok(ToolResult::Text(entries.join("\n")))
    }
}

/// read_file：读取单个文件（超长截断）
pub struct ReadFileTool {
    fs: SafeFs,
    max_chars: usize,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs, max_chars: usize) -> Self {
        Self { fs, max_chars }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the codebase."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Relative path to the file from the codebase root.")
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing required argument 'path'".to_string())?;
        tracing::debug!(path = %path, "read_file");
        self.fs
            .read_file(path, self.max_chars)
            .map(ToolResult::Text)
            .map_err(|e| e.to_string())
    }
}

/// get_tree：三层目录树
pub struct GetTreeTool {
    fs: SafeFs,
}

impl GetTreeTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for GetTreeTool {
    fn name(&self) -> &str {
        "get_tree"
    }

    fn description(&self) -> &str {
        "Get an indented directory tree of the codebase (up to 3 levels deep)."
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
        Ok(ToolResult::Text(self.fs.tree()))
    }
}
