//! 基于对话循环的阶段执行器
//!
//! 每次调用新建一个 AgentSession：按阶段装配工具（代码库工具沙箱到 target_path，
//! 调研工具带本阶段独享的页面预算），注入 system prompt 与初始消息，运行到得到合法输出。
//! 有截图能力时，4A 结束后并行补拍目标站与各竞品首页，作为 4F 的视觉证据。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::{inputs, prompts};
use crate::config::AppConfig;
use crate::core::{AgentError, StageId};
use crate::llm::{ModelTransport, Usage};
use crate::memory::Message;
use crate::react::{AgentSession, Observer, StructuredOutput};
use crate::schemas::{
    CodeAnalysisOutput, FeasibilityOutput, Pass1Output, Pass2Output, QualityAuditOutput,
    ResearchOutput, TechStackAdvisorOutput, UxDesignOutput,
};
use crate::tools::{
    capture_sites, page_budget, BrowsePageTool, BudgetGuard, DiscoverLinksTool, ExtractCssTool, GetTreeTool,
    ImageSequence, ListDirTool, PageCapture, PageFetcher, ReadFileTool, ReadManifestTool, SafeFs,
    ScreenshotTool, SearchCodeTool, ToolDispatcher, ToolRegistry, MAX_SCREENSHOTS,
};
use crate::workflow::{StageExecutor, StageOutcome, StageOutput, StageRequest};

/// 计入页面预算的工具
const PAGE_TOOLS: [&str; 2] = ["browse_page", "extract_css"];

pub struct AgentStageExecutor {
    transport: Arc<dyn ModelTransport>,
    config: AppConfig,
    capture: Option<Arc<dyn PageCapture>>,
}

impl AgentStageExecutor {
    pub fn new(transport: Arc<dyn ModelTransport>, config: AppConfig) -> Self {
        Self {
            transport,
            config,
            capture: None,
        }
    }

    /// 提供截图能力后，调研阶段会多一个 screenshot 工具
    pub fn with_capture(mut self, capture: Arc<dyn PageCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    fn session(&self, observer: Observer, cancel: CancellationToken) -> AgentSession {
        AgentSession::new(Arc::clone(&self.transport))
            .with_limits(&self.config.engine)
            .with_observer(observer)
            .with_cancel_token(cancel)
    }

    /// 只读代码库工具
    fn codebase_tools(&self, root: &str) -> ToolDispatcher {
        let tools = &self.config.tools;
        let fs = SafeFs::new(root);
        let mut registry = ToolRegistry::new();
        registry.register(GetTreeTool::new(fs.clone()));
        registry.register(ListDirTool::new(fs.clone()));
        registry.register(ReadFileTool::new(fs.clone(), tools.max_file_chars));
        registry.register(SearchCodeTool::new(fs.clone(), tools.max_search_results));
        registry.register(ReadManifestTool::new(fs));
        ToolDispatcher::new(registry, tools.tool_timeout_secs)
    }

    /// 网页工具；页面预算只在本次调用内有效
    fn web_tools(&self, site_depth: u8, with_screenshots: bool) -> ToolDispatcher {
        let tools = &self.config.tools;
        let fetcher = Arc::new(PageFetcher::new(tools.fetch_timeout_secs, tools.max_page_chars));
        let budget = Arc::new(BudgetGuard::new("page visit", page_budget(site_depth)));

        let mut registry = ToolRegistry::new();
        registry.register(BrowsePageTool::new(Arc::clone(&fetcher)));
        registry.register(DiscoverLinksTool::new(Arc::clone(&fetcher), Some(Arc::clone(&budget))));
        registry.register(ExtractCssTool::new(fetcher));
        if with_screenshots {
            if let Some(capture) = &self.capture {
                registry.register(ScreenshotTool::new(Arc::clone(capture)));
            }
        }
        ToolDispatcher::new(registry, tools.tool_timeout_secs).with_budget(budget, &PAGE_TOOLS)
    }

    /// 目标站 + 调研发现的竞品首页，补齐模型未截的部分
    async fn capture_evidence(
        &self,
        target_url: &str,
        research: &ResearchOutput,
        evidence: &mut Vec<ImageSequence>,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let Some(capture) = &self.capture else {
            return Ok(());
        };
        let urls: Vec<String> = std::iter::once(target_url.to_string())
            .chain(research.competitors.iter().map(|c| c.url.clone()))
            .collect();
        let shots = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            shots = capture_sites(capture.as_ref(), urls, evidence.as_slice(), MAX_SCREENSHOTS) => shots,
        };
        tracing::info!(captured = shots.len(), total = evidence.len() + shots.len(), "research screenshots");
        evidence.extend(shots);
        Ok(())
    }

    async fn run<T: StructuredOutput>(
        &self,
        session: AgentSession,
        stage: StageId,
        message: Message,
    ) -> Result<(T, Vec<ImageSequence>, Usage), AgentError> {
        let system = prompts::system_prompt(stage);
        let run = session.run_agent::<T>(&system, message).await?;
        tracing::info!(
            stage = %stage,
            turns = run.turns,
            attempts = run.attempts,
            tokens = run.usage.total(),
            "stage conversation finished"
        );
        Ok((run.output, run.evidence, run.usage))
    }
}

#[async_trait]
impl StageExecutor for AgentStageExecutor {
    async fn execute(
        &self,
        request: StageRequest,
        observer: Observer,
        cancel: CancellationToken,
    ) -> Result<StageOutcome, AgentError> {
        let stage = request.stage;
        let cfg = Arc::clone(&request.config);
        let message = inputs::initial_message(&request, self.config.engine.max_images_per_result);
        let session = self.session(observer, cancel.clone());

        let (output, usage) = match stage {
            StageId::Research => {
                let session = session.with_dispatcher(self.web_tools(cfg.site_depth, true));
                let (output, mut evidence, usage) =
                    self.run::<ResearchOutput>(session, stage, message).await?;
                self.capture_evidence(&cfg.target_url, &output, &mut evidence, &cancel)
                    .await?;
                (StageOutput::Research { output, evidence }, usage)
            }
            StageId::CodeAnalysis => {
                let session = session.with_dispatcher(self.codebase_tools(&cfg.target_path));
                let (output, _, usage) = self.run::<CodeAnalysisOutput>(session, stage, message).await?;
                (StageOutput::CodeAnalysis(output), usage)
            }
            StageId::RankingPass1 => {
                let (output, _, usage) = self.run::<Pass1Output>(session, stage, message).await?;
                (StageOutput::RankingPass1(output), usage)
            }
            StageId::Feasibility => {
                let session = session.with_dispatcher(self.codebase_tools(&cfg.target_path));
                let (output, _, usage) = self.run::<FeasibilityOutput>(session, stage, message).await?;
                (StageOutput::Feasibility(output), usage)
            }
            StageId::QualityAudit => {
                let session = session.with_dispatcher(self.web_tools(cfg.site_depth, false));
                let (output, _, usage) = self.run::<QualityAuditOutput>(session, stage, message).await?;
                (StageOutput::QualityAudit(output), usage)
            }
            StageId::TechStackAdvisor => {
                let session = session.with_dispatcher(self.codebase_tools(&cfg.target_path));
                let (output, _, usage) = self.run::<TechStackAdvisorOutput>(session, stage, message).await?;
                (StageOutput::TechStack(output), usage)
            }
            StageId::RankingPass2 => {
                let (output, _, usage) = self.run::<Pass2Output>(session, stage, message).await?;
                (StageOutput::RankingPass2(output), usage)
            }
            StageId::DesignAudit => {
                let (output, _, usage) = self.run::<UxDesignOutput>(session, stage, message).await?;
                (StageOutput::DesignAudit(output), usage)
            }
            StageId::Synthesis => {
                let system = prompts::system_prompt(stage);
                let (text, usage) = session.complete_text(&system, message).await?;
                (StageOutput::Synthesis(text), usage)
            }
        };
        Ok(StageOutcome { output, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::llm::{AssistantTurn, ScriptStep, ScriptedTransport};
    use crate::memory::ToolCall;
    use crate::workflow::Upstream;
    use serde_json::json;

    fn request(stage: StageId, root: &str) -> StageRequest {
        StageRequest {
            stage,
            config: Arc::new(AnalysisConfig::new(root, "", vec!["speed".into()])),
            upstream: Upstream::default(),
            feature: None,
        }
    }

    #[tokio::test]
    async fn test_code_analysis_gets_sandboxed_codebase_tools() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name": "site", "version": "1.0.0"}"#).unwrap();
        let transport = Arc::new(ScriptedTransport::new().with_route(
            "Code Analysis",
            vec![
                ScriptStep::Reply(AssistantTurn::tool_calls(vec![ToolCall {
                    id: "m".into(),
                    name: "read_manifest".into(),
                    arguments: json!({}),
                }])),
                ScriptStep::Reply(AssistantTurn::text(
                    json!({"tech_stack": [], "architecture": {}, "summary": "ok"}).to_string(),
                )),
            ],
        ));
        let executor = AgentStageExecutor::new(transport.clone(), AppConfig::default());
        let root = dir.path().to_string_lossy().to_string();
        let outcome = executor
            .execute(request(StageId::CodeAnalysis, &root), Observer::noop(), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome.output, StageOutput::CodeAnalysis(ref c) if c.summary == "ok"));

        let reqs = transport.requests();
        assert_eq!(
            reqs[0].tool_names,
            vec!["get_tree", "list_dir", "read_file", "search_code", "read_manifest"]
        );
        let manifest_reply = &reqs[1].messages[2];
        assert!(manifest_reply.content.contains("package.json"), "{}", manifest_reply.content);
    }

    struct Tiles;

    #[async_trait]
    impl PageCapture for Tiles {
        async fn capture(&self, url: &str) -> Result<Vec<String>, String> {
            if url.contains("offline") {
                Err("timeout".into())
            } else {
                Ok(vec![format!("{url}#0"), format!("{url}#1")])
            }
        }
    }

    #[tokio::test]
    async fn test_research_captures_target_and_competitors() {
        let transport = Arc::new(ScriptedTransport::new().with_route(
            "Comparative Research",
            vec![
                ScriptStep::Reply(AssistantTurn::tool_calls(vec![ToolCall {
                    id: "s".into(),
                    name: "screenshot".into(),
                    arguments: json!({"url": "https://rival.example"}),
                }])),
                ScriptStep::Reply(AssistantTurn::text(
                    json!({"competitors": [
                        {"name": "Rival", "url": "https://rival.example"},
                        {"name": "Other", "url": "https://other.example"},
                        {"name": "Gone", "url": "https://offline.example"}
                    ]})
                    .to_string(),
                )),
            ],
        ));
        let executor = AgentStageExecutor::new(transport.clone(), AppConfig::default())
            .with_capture(Arc::new(Tiles));
        let mut req = request(StageId::Research, "");
        req.config = Arc::new(AnalysisConfig::new("", "https://site.example", vec!["speed".into()]));
        let outcome = executor
            .execute(req, Observer::noop(), CancellationToken::new())
            .await
            .unwrap();

        assert!(transport.requests()[0].tool_names.contains(&"screenshot".to_string()));
        match outcome.output {
            StageOutput::Research { evidence, .. } => {
                let sources: Vec<_> = evidence.iter().map(|e| e.source.as_str()).collect();
                assert_eq!(
                    sources,
                    vec!["https://rival.example", "https://site.example", "https://other.example"]
                );
                assert_eq!(evidence[1].tiles, vec!["https://site.example#0", "https://site.example#1"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_synthesis_is_plain_text() {
        let transport = Arc::new(ScriptedTransport::new().with_route(
            "Executive Synthesis",
            vec![ScriptStep::Reply(AssistantTurn::text("## Summary\nShip search first."))],
        ));
        let executor = AgentStageExecutor::new(transport.clone(), AppConfig::default());
        let outcome = executor
            .execute(request(StageId::Synthesis, ""), Observer::noop(), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome.output, StageOutput::Synthesis(ref t) if t.starts_with("## Summary")));
        assert!(transport.requests()[0].tool_names.is_empty());
    }
}
