//! sea 命令行入口
//!
//! analyze：完整流水线 → 快照 + Markdown 报告；feature：对已有快照增量评估功能；
//! validate：只校验配置；render：从快照重新渲染报告，不执行任何阶段。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use sea::agents::AgentStageExecutor;
use sea::config::{load_analysis_config, load_config, AnalysisConfig, AppConfig};
use sea::core::{PipelineState, SessionSupervisor};
use sea::llm::{dry_run_transport, ModelTransport, OpenAiTransport, RetryConfig, RetryingTransport};
use sea::observability;
use sea::report::{self, render_patch_report, ReportBundle};
use sea::workflow::{patch_features, Orchestrator, RunSummary};

#[derive(Debug, Parser)]
#[command(name = "sea", version, about = "Multi-agent site evolution analysis")]
struct Cli {
    /// 引擎配置文件，叠加在 config/default.toml 之上
    #[arg(long, global = true)]
    engine_config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the full two-pass analysis pipeline")]
    Analyze {
        #[arg(long, default_value = "analysis-config.yml")]
        config: PathBuf,
        /// 每个阶段返回固定输出，不调用模型
        #[arg(long)]
        dry_run: bool,
    },
    #[command(about = "Re-evaluate features and merge them into the last snapshot")]
    Feature {
        #[arg(long, default_value = "analysis-config.yml")]
        config: PathBuf,
        #[arg(long = "name", required = true)]
        names: Vec<String>,
        /// 额外写一份只含本次功能的报告
        #[arg(long)]
        patch_report: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    #[command(about = "Validate an analysis config without running anything")]
    Validate {
        #[arg(long, default_value = "analysis-config.yml")]
        config: PathBuf,
    },
    #[command(about = "Render the Markdown report from the last snapshot")]
    Render {
        #[arg(long, default_value = "analysis-config.yml")]
        config: PathBuf,
    },
}

fn transport(app: &AppConfig, dry_run: bool) -> Arc<dyn ModelTransport> {
    if dry_run {
        tracing::info!("dry run: stages return canned output");
        return Arc::new(dry_run_transport());
    }
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            let inner = Arc::new(OpenAiTransport::new(
                app.llm.base_url.as_deref(),
                &app.llm.model,
                Some(&key),
                app.llm.request_timeout_secs,
            ));
            Arc::new(RetryingTransport::new(
                inner,
                RetryConfig {
                    max_retries: app.llm.retry.max_retries,
                    base_delay: Duration::from_millis(app.llm.retry.base_delay_ms),
                },
            ))
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY is not set; falling back to the dry-run transport");
            Arc::new(dry_run_transport())
        }
    }
}

/// Ctrl+C 取消整次运行
fn cancel_on_ctrl_c(supervisor: SessionSupervisor) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            supervisor.cancel();
        }
    });
}

/// 启用 browser feature 时用 headless Chrome 截图；dry run 不启动浏览器
#[cfg(feature = "browser")]
fn with_browser(executor: AgentStageExecutor, dry_run: bool) -> AgentStageExecutor {
    if dry_run {
        return executor;
    }
    executor.with_capture(Arc::new(sea::tools::ChromeCapture::new()))
}

#[cfg(not(feature = "browser"))]
fn with_browser(executor: AgentStageExecutor, _dry_run: bool) -> AgentStageExecutor {
    tracing::info!("built without the `browser` feature; screenshots and the design audit are unavailable");
    executor
}

fn snapshot_path(app: &AppConfig, analysis: &AnalysisConfig) -> PathBuf {
    analysis.output_directory.join(&app.engine.snapshot_file)
}

fn orchestrator(app: &AppConfig, dry_run: bool) -> Orchestrator {
    let supervisor = SessionSupervisor::new();
    cancel_on_ctrl_c(supervisor.clone());
    let (progress, rx) = broadcast::channel(256);
    observability::spawn_progress_logger(rx);
    let executor = with_browser(AgentStageExecutor::new(transport(app, dry_run), app.clone()), dry_run);
    Orchestrator::new(Arc::new(executor))
        .with_supervisor(supervisor)
        .with_progress(progress)
}

fn print_summary(summary: &RunSummary) {
    println!("Succeeded: {}", summary.succeeded.len());
    for (stage, reason) in &summary.failed {
        println!("Failed:    {stage}: {reason}");
    }
    for (stage, reason) in &summary.skipped {
        println!("Skipped:   {stage}: {reason}");
    }
    if summary.cancelled {
        println!("Cancelled; not started: {}", summary.pending.len());
    }
}

async fn analyze(app: &AppConfig, config: &Path, dry_run: bool) -> Result<()> {
    let analysis = load_analysis_config(config).context("Failed to load analysis config")?;
    let out_dir = analysis.output_directory.clone();
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let snapshot = snapshot_path(app, &analysis);

    let orchestrator = orchestrator(app, dry_run).with_snapshot_path(&snapshot);
    let mut state = PipelineState::new(analysis);
    let summary = orchestrator.run(&mut state).await.context("Pipeline run failed")?;
    let report = report::write_report(&state, &out_dir).context("Failed to write report")?;

    print_summary(&summary);
    println!("Snapshot: {}", snapshot.display());
    println!("Report:   {}", report.display());
    Ok(())
}

async fn feature(
    app: &AppConfig,
    config: &Path,
    names: Vec<String>,
    patch_report: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let analysis = load_analysis_config(config).context("Failed to load analysis config")?;
    let snapshot = snapshot_path(app, &analysis);
    if !snapshot.exists() {
        bail!("No snapshot at {}; run `sea analyze` first", snapshot.display());
    }

    let orchestrator = orchestrator(app, dry_run);
    let outcome = patch_features(&orchestrator, &snapshot, names.clone())
        .await
        .context("Feature patch failed")?;
    let report = report::write_report(&outcome.state, &analysis.output_directory)
        .context("Failed to write report")?;

    print_summary(&outcome.summary);
    println!(
        "Merged: {} replaced, {} appended",
        outcome.report.replaced, outcome.report.appended
    );
    println!("Report: {}", report.display());

    if let Some(dir) = patch_report {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let bundle = ReportBundle::from_state(&outcome.state);
        let path = dir.join(format!(
            "patch-report-{}.md",
            bundle.generated_at.format("%Y%m%d-%H%M%S")
        ));
        std::fs::write(&path, render_patch_report(&bundle, &names, &outcome.report))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Patch report: {}", path.display());
    }
    Ok(())
}

fn validate(config: &Path) -> Result<()> {
    let analysis = load_analysis_config(config).context("Invalid analysis config")?;
    println!("Config OK: {}", analysis.display_name());
    println!("  target_path: {}", analysis.target_path);
    println!("  target_url:  {}", analysis.target_url);
    println!("  priorities:  {}", analysis.priorities.join(", "));
    if !analysis.features.is_empty() {
        println!("  features:    {}", analysis.features.join(", "));
    }
    Ok(())
}

fn render(app: &AppConfig, config: &Path) -> Result<()> {
    let analysis = load_analysis_config(config).context("Failed to load analysis config")?;
    let snapshot = snapshot_path(app, &analysis);
    let state = PipelineState::load(&snapshot)
        .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    let report = report::write_report(&state, &analysis.output_directory)
        .context("Failed to write report")?;
    println!("Report: {}", report.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init(cli.verbose);

    let app = load_config(cli.engine_config.clone()).context("Failed to load engine config")?;

    match cli.command {
        Commands::Analyze { config, dry_run } => analyze(&app, &config, dry_run).await,
        Commands::Feature {
            config,
            names,
            patch_report,
            dry_run,
        } => feature(&app, &config, names, patch_report, dry_run).await,
        Commands::Validate { config } => validate(&config),
        Commands::Render { config } => render(&app, &config),
    }
}
