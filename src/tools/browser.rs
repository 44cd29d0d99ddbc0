//! headless Chrome 整页截图
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 浏览器在第一次截图时启动并复用；每个 URL 一个新标签页，按视口高度自上而下滚动截取 JPEG 切片。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::tools::PageCapture;

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 800;
const JPEG_QUALITY: u32 = 70;
/// 超长页面只截前若干屏
const MAX_TILES: usize = 20;

pub struct ChromeCapture {
    browser: Arc<Mutex<Option<Arc<Browser>>>>,
}

impl ChromeCapture {
    pub fn new() -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for ChromeCapture {
    fn default() -> Self {
        Self::new()
    }
}

fn launch() -> Result<Browser, String> {
    let options = LaunchOptions::default_builder()
        .window_size(Some((VIEWPORT_WIDTH, VIEWPORT_HEIGHT)))
        .build()
        .map_err(|e| format!("Chrome options invalid: {}", e))?;
    Browser::new(options).map_err(|e| format!("Chrome launch failed: {}. Install Chrome/Chromium.", e))
}

fn shared_browser(slot: &Mutex<Option<Arc<Browser>>>) -> Result<Arc<Browser>, String> {
    let mut guard = slot.lock().map_err(|e| e.to_string())?;
    if let Some(browser) = guard.as_ref() {
        return Ok(Arc::clone(browser));
    }
    let browser = Arc::new(launch()?);
    *guard = Some(Arc::clone(&browser));
    Ok(browser)
}

fn capture_tiles(tab: &Tab, url: &str) -> Result<Vec<String>, String> {
    tab.navigate_to(url)
        .map_err(|e| format!("Navigate failed: {}", e))?;
    tab.wait_until_navigated()
        .map_err(|e| format!("Page load failed: {}", e))?;

    let height = tab
        .evaluate("document.body.scrollHeight", false)
        .map_err(|e| format!("Measure page failed: {}", e))?
        .value
        .and_then(|v| v.as_u64())
        .unwrap_or(u64::from(VIEWPORT_HEIGHT));

    let mut tiles = Vec::new();
    let mut y = 0u64;
    while y < height.max(1) && tiles.len() < MAX_TILES {
        tab.evaluate(&format!("window.scrollTo(0, {y})"), false)
            .map_err(|e| format!("Scroll failed: {}", e))?;
        std::thread::sleep(Duration::from_millis(100));
        let raw = tab
            .capture_screenshot(CaptureScreenshotFormatOption::Jpeg, Some(JPEG_QUALITY), None, true)
            .map_err(|e| format!("Screenshot failed: {}", e))?;
        tiles.push(base64::engine::general_purpose::STANDARD.encode(raw));
        y += u64::from(VIEWPORT_HEIGHT);
    }
    Ok(tiles)
}

#[async_trait]
impl PageCapture for ChromeCapture {
    async fn capture(&self, url: &str) -> Result<Vec<String>, String> {
        let url = url.to_string();
        let slot = Arc::clone(&self.browser);

        tracing::info!(url = %url, "browser screenshot");

        tokio::task::spawn_blocking(move || {
            let browser = shared_browser(&slot)?;
            let tab = browser
                .new_tab()
                .map_err(|e| format!("Browser tab failed: {}", e))?;
            let tiles = capture_tiles(&tab, &url);
            if let Err(e) = tab.close(true) {
                tracing::debug!(url = %url, error = %e, "tab close failed");
            }
            tiles
        })
        .await
        .map_err(|e| format!("Task join: {}", e))?
    }
}
