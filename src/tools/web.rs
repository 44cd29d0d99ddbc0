//! 页面抓取工具（研究阶段）
//!
//! PageFetcher 负责 HTTP GET（超时、UA、BOM 处理），解析部分都是纯函数：
//! - browse_page：标题、描述、标题层级 + html2text 正文（截断）
//! - discover_links：同源链接 `{url, text}`，去重，最多 30 条
//! - extract_css：内联样式中的 CSS 自定义属性与字体
//!
//! browse_page / extract_css 计入页面预算（由分发器挂 BudgetGuard）；discover_links 不计，
//! 只在结果前附上剩余预算。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{json, Value};

use crate::tools::{BudgetGuard, Tool, ToolResult};

/// 按 site_depth 的页面访问预算
pub fn page_budget(site_depth: u8) -> usize {
    match site_depth {
        0 => 10,
        1 => 25,
        2 => 50,
        _ => 25,
    }
}

const MAX_LINKS: usize = 30;
const MAX_CUSTOM_PROPERTIES: usize = 50;
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"))
}

fn meta_desc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<meta[^>]+name=["']description["'][^>]+content=["']([^"']*)["']"#)
            .expect("valid regex")
    })
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h([1-4])[^>]*>(.*?)</h[1-4]>").expect("valid regex"))
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*href=["']([^"']+)["'][^>]*>(.*?)</a>"#).expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style[^>]*>(.*?)</style>").expect("valid regex"))
}

fn custom_prop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(--[A-Za-z0-9_-]+)\s*:\s*([^;}]+)").expect("valid regex"))
}

fn font_family_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)font-family\s*:\s*([^;}]+)").expect("valid regex"))
}

/// 去标签并折叠空白
fn inner_text(fragment: &str) -> String {
    tag_re()
        .replace_all(fragment, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect::<String>() + "\n...[truncated]"
    } else {
        s.to_string()
    }
}

/// 结构化页面文本
pub fn page_text(html: &str, max_chars: usize) -> String {
    let mut sections = Vec::new();
    if let Some(c) = title_re().captures(html) {
        sections.push(format!("# {}", inner_text(&c[1])));
    }
    if let Some(c) = meta_desc_re().captures(html) {
        sections.push(format!("Description: {}", c[1].trim()));
    }
    let headings: Vec<String> = heading_re()
        .captures_iter(html)
        .map(|c| {
            let level: usize = c[1].parse().unwrap_or(1);
            let text: String = inner_text(&c[2]).chars().take(120).collect();
            format!("{}H{}: {}", "  ".repeat(level - 1), level, text)
        })
        .collect();
    if !headings.is_empty() {
        sections.push("\n## Content Structure".to_string());
        sections.extend(headings);
    }
    let body = match html2text::from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => inner_text(html),
    };
    sections.push("\n## Main Content (truncated)".to_string());
    sections.push(body);
    truncate_chars(&sections.join("\n"), max_chars)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageLink {
    pub url: String,
    pub text: String,
}

/// 同源链接：解析相对地址，去掉 fragment，去重
pub fn discover_links(html: &str, base: &Url) -> Vec<PageLink> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for c in anchor_re().captures_iter(html) {
        let href = c[1].trim();
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        if url.origin() != base.origin() {
            continue;
        }
        url.set_fragment(None);
        let text: String = inner_text(&c[2]).chars().take(80).collect();
        if text.is_empty() || !seen.insert(url.to_string()) {
            continue;
        }
        out.push(PageLink {
            url: url.to_string(),
            text,
        });
        if out.len() >= MAX_LINKS {
            break;
        }
    }
    out
}

/// 内联 `<style>` 中的自定义属性（最多 50 个）与字体
pub fn extract_css(html: &str) -> Value {
    let mut props = serde_json::Map::new();
    let mut total = 0usize;
    let mut fonts = Vec::new();
    for style in style_re().captures_iter(html) {
        let css = &style[1];
        for c in custom_prop_re().captures_iter(css) {
            if props.contains_key(&c[1]) {
                continue;
            }
            total += 1;
            if props.len() < MAX_CUSTOM_PROPERTIES {
                props.insert(c[1].to_string(), Value::String(c[2].trim().to_string()));
            }
        }
        for c in font_family_re().captures_iter(css) {
            let font = c[1].trim().to_string();
            if !fonts.contains(&font) {
                fonts.push(font);
            }
        }
    }
    json!({
        "custom_properties": props,
        "custom_properties_total": total,
        "fonts": fonts,
    })
}

/// 共享 HTTP 客户端
pub struct PageFetcher {
    client: Client,
    max_chars: usize,
}

impl PageFetcher {
    pub fn new(timeout_secs: u64, max_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client, max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub async fn fetch_html(&self, url: &str) -> Result<(Url, String), String> {
        let parsed = Url::parse(url.trim()).map_err(|e| format!("Invalid URL {url}: {e}"))?;
        let resp = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let final_url = resp.url().clone();
        let body = resp.text().await.map_err(|e| format!("Read body: {e}"))?;
        let body = body.strip_prefix('\u{FEFF}').map(str::to_string).unwrap_or(body);
        Ok((final_url, body))
    }
}

fn url_arg(args: &Value) -> Result<&str, String> {
    args.get("url")
        .and_then(|v| v.as_str())
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| "missing required argument 'url'".to_string())
}

fn url_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "url": {"type": "string", "description": description}
        },
        "required": ["url"]
    })
}

pub struct BrowsePageTool {
    fetcher: Arc<PageFetcher>,
}

impl BrowsePageTool {
    pub fn new(fetcher: Arc<PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for BrowsePageTool {
    fn name(&self) -> &str {
        "browse_page"
    }

    fn description(&self) -> &str {
        "Fetch a page and return its structured text content: title, description, heading hierarchy and main text. Use 'screenshot' for visual design assessment."
    }

    fn parameters_schema(&self) -> Value {
        url_schema("The URL to browse.")
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let url = url_arg(&args)?;
        let (_, html) = self
            .fetcher
            .fetch_html(url)
            .await
            .map_err(|e| format!("Error browsing {url}: {e}"))?;
        Ok(ToolResult::Text(page_text(&html, self.fetcher.max_chars())))
    }
}

pub struct DiscoverLinksTool {
    fetcher: Arc<PageFetcher>,
    budget: Option<Arc<BudgetGuard>>,
}

impl DiscoverLinksTool {
    pub fn new(fetcher: Arc<PageFetcher>, budget: Option<Arc<BudgetGuard>>) -> Self {
        Self { fetcher, budget }
    }
}

#[async_trait]
impl Tool for DiscoverLinksTool {
    fn name(&self) -> &str {
        "discover_links"
    }

    fn description(&self) -> &str {
        "Discover internal navigation links on a page. Returns a list of {url, text} objects. Use this to find key pages to explore within the configured site depth."
    }

    fn parameters_schema(&self) -> Value {
        url_schema("The URL to discover links on.")
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let url = url_arg(&args)?;
        let (base, html) = self
            .fetcher
            .fetch_html(url)
            .await
            .map_err(|e| format!("Error discovering links on {url}: {e}"))?;
        let links = discover_links(&html, &base);
        let body = serde_json::to_string_pretty(&links).map_err(|e| e.to_string())?;
        Ok(ToolResult::Text(match &self.budget {
            Some(b) => format!("[{} page visits remaining in budget]\n\n{body}", b.remaining()),
            None => body,
        }))
    }
}

pub struct ExtractCssTool {
    fetcher: Arc<PageFetcher>,
}

impl ExtractCssTool {
    pub fn new(fetcher: Arc<PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for ExtractCssTool {
    fn name(&self) -> &str {
        "extract_css"
    }

    fn description(&self) -> &str {
        "Extract CSS custom properties and font families from a page."
    }

    fn parameters_schema(&self) -> Value {
        url_schema("The URL to extract CSS from.")
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let url = url_arg(&args)?;
        let (_, html) = self
            .fetcher
            .fetch_html(url)
            .await
            .map_err(|e| format!("Error extracting CSS from {url}: {e}"))?;
        serde_json::to_string_pretty(&extract_css(&html))
            .map(ToolResult::Text)
            .map_err(|e| e.to_string())
    }
}
