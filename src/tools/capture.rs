//! 截图工具
//!
//! 截图能力通过 PageCapture 注入（启用 `browser` feature 时为 headless Chrome）；
//! 没有注入时研究阶段不注册 screenshot，也不补拍。
//! 截图数量单独限额，不占页面预算；失败的截图不计数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};

use crate::tools::{ImageSequence, Tool, ToolResult};

/// 每次运行最多截图数（目标站 + 最多 5 个竞品）
pub const MAX_SCREENSHOTS: usize = 6;

/// 整页截图：返回自上而下、每张一个视口高度（800px）的 base64 JPEG 切片
#[async_trait]
pub trait PageCapture: Send + Sync {
    async fn capture(&self, url: &str) -> Result<Vec<String>, String>;
}

pub struct ScreenshotTool {
    capture: Arc<dyn PageCapture>,
    taken: AtomicUsize,
    limit: usize,
}

impl ScreenshotTool {
    pub fn new(capture: Arc<dyn PageCapture>) -> Self {
        Self {
            capture,
            taken: AtomicUsize::new(0),
            limit: MAX_SCREENSHOTS,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
impl Tool for ScreenshotTool {
    fn name(&self) -> &str {
        "screenshot"
    }

    fn description(&self) -> &str {
        "Take a full-page screenshot of a URL. Returns all viewport-height sections for visual UX comparison. Screenshot the target site and each competitor homepage."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to screenshot."}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing required argument 'url'".to_string())?;
        let reserved = self
            .taken
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.limit).then_some(n + 1))
            .is_ok();
        if !reserved {
            return Ok(ToolResult::Text(format!(
                "Screenshot budget reached ({} max). Use browse_page or extract_css for remaining sites.",
                self.limit
            )));
        }
        match self.capture.capture(url).await {
            Ok(tiles) if !tiles.is_empty() => Ok(ToolResult::Images(ImageSequence {
                source: url.to_string(),
                tiles,
            })),
            Ok(_) => {
                self.taken.fetch_sub(1, Ordering::SeqCst);
                Err(format!("Error taking screenshot of {url}: empty capture"))
            }
            Err(e) => {
                self.taken.fetch_sub(1, Ordering::SeqCst);
                Err(format!("Error taking screenshot of {url}: {e}"))
            }
        }
    }
}

/// 并行补拍：跳过空串、重复与已截过的 URL，总数（含已有）不超过 `limit`；失败只记日志
pub async fn capture_sites(
    capture: &dyn PageCapture,
    urls: Vec<String>,
    existing: &[ImageSequence],
    limit: usize,
) -> Vec<ImageSequence> {
    let mut pending: Vec<String> = Vec::new();
    for url in urls {
        let url = url.trim().to_string();
        if url.is_empty()
            || pending.contains(&url)
            || existing.iter().any(|seq| seq.source == url)
        {
            continue;
        }
        pending.push(url);
    }
    pending.truncate(limit.saturating_sub(existing.len()));
    if pending.is_empty() {
        return Vec::new();
    }

    tracing::info!(count = pending.len(), urls = ?pending, "capturing screenshots");
    let shots = join_all(pending.into_iter().map(|url| async move {
        let result = capture.capture(&url).await;
        (url, result)
    }))
    .await;

    shots
        .into_iter()
        .filter_map(|(url, result)| match result {
            Ok(tiles) if !tiles.is_empty() => Some(ImageSequence { source: url, tiles }),
            Ok(_) => {
                tracing::warn!(url = %url, "screenshot returned no tiles");
                None
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "screenshot failed");
                None
            }
        })
        .collect()
}
