//! 配置：引擎配置（config/default.toml + 环境变量）与单次分析配置（analysis-config.yml）
//!
//! 引擎配置加载顺序：先读 TOML 文件，再用环境变量 `SEA__*` 覆盖（双下划线表示嵌套，如 `SEA__LLM__MODEL=gpt-4o`）。
//! 分析配置描述被分析的站点：目标路径 / URL、优先级、竞品、待评估功能等，由 `load_analysis_config` 读取并校验。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 引擎配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [llm] 段：模型、端点与限流重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
            retry: RetrySection::default(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

/// [llm.retry] 段：429 限流时的指数退避
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 首次退避毫秒数，之后每次翻倍
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5_000
}

/// [engine] 段：对话轮数上限、结构化输出重试次数、每个图片结果最多发送的切片数
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_output_attempts")]
    pub max_output_attempts: usize,
    #[serde(default = "default_max_images_per_result")]
    pub max_images_per_result: usize,
    /// 快照文件名（位于 output_directory 下）
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_output_attempts: default_max_output_attempts(),
            max_images_per_result: default_max_images_per_result(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

fn default_max_turns() -> usize {
    30
}

fn default_max_output_attempts() -> usize {
    3
}

fn default_max_images_per_result() -> usize {
    2
}

fn default_snapshot_file() -> String {
    "pipeline-state.json".to_string()
}

/// [tools] 段：工具超时与抓取 / 读取上限
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// browse_page 返回文本的最大字符数
    #[serde(default = "default_max_page_chars")]
    pub max_page_chars: usize,
    /// read_file 返回内容的最大字符数
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_page_chars: default_max_page_chars(),
            max_file_chars: default_max_file_chars(),
            max_search_results: default_max_search_results(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_max_page_chars() -> usize {
    15_000
}

fn default_max_file_chars() -> usize {
    50_000
}

fn default_max_search_results() -> usize {
    50
}

/// 从 config 目录加载引擎配置，环境变量 SEA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SEA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SEA")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 技术约束：必须保留 / 必须避免的技术与预算说明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub must_keep: Vec<String>,
    pub must_avoid: Vec<String>,
    pub budget: String,
}

/// 单次分析配置（analysis-config.yml / .toml）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub target_path: String,
    #[serde(default)]
    pub target_url: String,
    pub priorities: Vec<String>,
    #[serde(default)]
    pub site_name: String,
    #[serde(default)]
    pub site_description: String,
    #[serde(default)]
    pub competitor_urls: Vec<String>,
    #[serde(default)]
    pub known_issues: Vec<String>,
    #[serde(default)]
    pub user_feedback: String,
    #[serde(default)]
    pub design_assets: Vec<String>,
    /// 交给 Tech Stack Advisor 逐个评估的功能；为空时取 Pass 1 推荐标题
    #[serde(default)]
    pub features: Vec<String>,
    /// 0 = 仅首页，1 = 一级页面，2 = 两跳以内
    #[serde(default = "default_site_depth")]
    pub site_depth: u8,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default)]
    pub constraints: Constraints,
}

fn default_site_depth() -> u8 {
    1
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./output")
}

impl AnalysisConfig {
    /// 最小配置：仅目标与优先级，其余取默认值
    pub fn new(target_path: impl Into<String>, target_url: impl Into<String>, priorities: Vec<String>) -> Self {
        Self {
            target_path: target_path.into(),
            target_url: target_url.into(),
            priorities,
            site_name: String::new(),
            site_description: String::new(),
            competitor_urls: Vec::new(),
            known_issues: Vec::new(),
            user_feedback: String::new(),
            design_assets: Vec::new(),
            features: Vec::new(),
            site_depth: default_site_depth(),
            output_directory: default_output_directory(),
            constraints: Constraints::default(),
        }
    }

    pub fn has_target_path(&self) -> bool {
        !self.target_path.trim().is_empty()
    }

    pub fn has_target_url(&self) -> bool {
        !self.target_url.trim().is_empty()
    }

    /// 站点名：未配置时退回 URL 或路径
    pub fn display_name(&self) -> &str {
        if !self.site_name.is_empty() {
            &self.site_name
        } else if self.has_target_url() {
            &self.target_url
        } else {
            &self.target_path
        }
    }

    /// 去掉列表中的空白项（YAML 中常见的 `- ` 空行）
    pub fn normalize(&mut self) {
        fn strip(items: &mut Vec<String>) {
            items.retain(|s| !s.trim().is_empty());
        }
        strip(&mut self.priorities);
        strip(&mut self.competitor_urls);
        strip(&mut self.known_issues);
        strip(&mut self.design_assets);
        strip(&mut self.features);
        strip(&mut self.constraints.must_keep);
        strip(&mut self.constraints.must_avoid);
    }

    /// 校验：至少一个目标、至少一个优先级、target_path 存在、site_depth 在 0..=2
    pub fn validate(&self) -> Result<(), AgentError> {
        if !self.has_target_path() && !self.has_target_url() {
            return Err(AgentError::Config(
                "At least one of 'target_path' or 'target_url' must be provided".into(),
            ));
        }
        if self.priorities.is_empty() {
            return Err(AgentError::Config("At least one priority is required".into()));
        }
        if self.has_target_path() && !Path::new(&self.target_path).exists() {
            return Err(AgentError::Config(format!(
                "target_path does not exist: {}",
                self.target_path
            )));
        }
        if self.site_depth > 2 {
            return Err(AgentError::Config(format!(
                "site_depth must be 0, 1 or 2 (got {})",
                self.site_depth
            )));
        }
        Ok(())
    }
}

/// 读取分析配置文件（YAML / TOML / JSON 由扩展名决定），清理空项后校验
pub fn load_analysis_config(path: &Path) -> Result<AnalysisConfig, AgentError> {
    if !path.exists() {
        return Err(AgentError::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let mut cfg: AnalysisConfig = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| AgentError::Config(e.to_string()))?;
    cfg.normalize();
    cfg.validate()?;
    Ok(cfg)
}
