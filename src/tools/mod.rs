#[cfg(feature = "browser")]
pub mod browser;
pub mod budget;
pub mod capture;
pub mod code_grep;
pub mod executor;
pub mod filesystem;
pub mod manifest;
pub mod registry;
pub mod schema;
pub mod web;

#[cfg(feature = "browser")]
pub use browser::ChromeCapture;
pub use budget::BudgetGuard;
pub use capture::{capture_sites, PageCapture, ScreenshotTool, MAX_SCREENSHOTS};
pub use code_grep::SearchCodeTool;
pub use executor::{Dispatched, ToolDispatcher, ToolOutcome};
pub use filesystem::{GetTreeTool, ListDirTool, ReadFileTool, SafeFs};
pub use manifest::ReadManifestTool;
pub use registry::{ImageSequence, Tool, ToolRegistry, ToolResult};
pub use schema::{translate_tools, ToolSpec};
pub use web::{page_budget, BrowsePageTool, DiscoverLinksTool, ExtractCssTool, PageFetcher};
