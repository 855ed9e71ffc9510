//! Tradeflow CLI
//!
//! The `tradeflow` command runs the multi-role analysis pipeline against an
//! OpenAI-compatible backend and manages role memories.
//!
//! ## Commands
//!
//! - `run`: Analyse one ticker for one date and print the trading signal
//! - `reflect`: Store lessons from a saved run given its realised return
//! - `recall`: Query a role's memory
//! - `signal`: Extract BUY/SELL/HOLD from decision text
//! - `plan`: Print the node sequence a configuration will visit
//! - `config`: Print the effective configuration as TOML

mod providers;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn, Level};

use tradeflow_core::{
    cancellation, render_summary_md, AnalysisRecord, MemoryRole, Outcome, PipelineConfig,
    RecordUpdate, RunStatus, SignalExtractor, StreamEvent, TradingPipeline,
};

use providers::{BackendConfig, API_KEY_ENV, BACKEND_URL_ENV, TOOLS_URL_ENV};

#[derive(Parser)]
#[command(name = "tradeflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-role trading analysis pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    backend: BackendArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct BackendArgs {
    /// Base URL of the OpenAI-compatible backend
    #[arg(long, global = true, env = BACKEND_URL_ENV, default_value = "http://localhost:8000/v1")]
    backend_url: String,

    /// Bearer token for the backend
    #[arg(long, global = true, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the market data tool service
    #[arg(long, global = true, env = TOOLS_URL_ENV, default_value = "http://localhost:8100/tools")]
    tools_url: String,

    /// Model for analyst steps
    #[arg(long, global = true, default_value = "gpt-4o-mini")]
    quick_model: String,

    /// Model for research, trading, risk and reflection steps
    #[arg(long, global = true, default_value = "gpt-4o")]
    deep_model: String,

    /// Model for memory embeddings
    #[arg(long, global = true, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Per-request HTTP timeout in seconds
    #[arg(long, global = true, default_value = "120")]
    request_timeout_secs: u64,
}

impl BackendArgs {
    fn to_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.backend_url.clone(),
            api_key: self.api_key.clone(),
            tools_url: self.tools_url.clone(),
            quick_model: self.quick_model.clone(),
            deep_model: self.deep_model.clone(),
            embedding_model: self.embedding_model.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a ticker for a date and print the trading signal
    Run {
        /// Ticker symbol, e.g. 000001 or SH.600519
        #[arg(short, long)]
        ticker: String,

        /// Trade date (YYYY-MM-DD)
        #[arg(short, long)]
        date: NaiveDate,

        /// Override the configured analysts (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        analysts: Option<Vec<String>>,

        /// Write the final record as JSON for a later `reflect`
        #[arg(long)]
        record_out: Option<PathBuf>,

        /// Write a markdown summary of the run
        #[arg(long)]
        summary_out: Option<PathBuf>,
    },

    /// Store lessons from a saved run given its realised return
    Reflect {
        /// Record JSON written by `run --record-out`
        #[arg(short, long)]
        record: PathBuf,

        /// Realised return in percent, e.g. -3.2
        #[arg(long, allow_hyphen_values = true)]
        returns: f64,

        /// Free-text note passed to the reflection prompt
        #[arg(long)]
        note: Option<String>,
    },

    /// Query a role's memory for lessons similar to a situation
    Recall {
        /// Memory role (bull, bear, research_manager, trader, invest_judge, risk_manager)
        #[arg(short, long)]
        role: MemoryRole,

        /// Situation text to match
        #[arg(short, long)]
        query: String,

        /// Number of matches
        #[arg(short, default_value = "3")]
        k: usize,
    },

    /// Extract a BUY/SELL/HOLD signal from text (reads stdin when omitted)
    Signal { text: Option<String> },

    /// Print the node sequence the configuration will visit
    Plan,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tradeflow_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let backend = cli.backend.to_config();

    match cli.command {
        Commands::Run {
            ticker,
            date,
            analysts,
            record_out,
            summary_out,
        } => {
            let mut config = config;
            if let Some(analysts) = analysts {
                config.analysts = analysts;
            }
            cmd_run(
                config,
                &backend,
                &ticker,
                date,
                record_out.as_deref(),
                summary_out.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Reflect {
            record,
            returns,
            note,
        } => cmd_reflect(config, &backend, &record, returns, note, cli.json).await,
        Commands::Recall { role, query, k } => {
            cmd_recall(config, &backend, role, &query, k, cli.json).await
        }
        Commands::Signal { text } => cmd_signal(text, cli.json),
        Commands::Plan => cmd_plan(config, &backend, cli.json),
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration: {:?}", path)),
        None => Ok(PipelineConfig::default()),
    }
}

fn connect(config: PipelineConfig, backend: &BackendConfig) -> Result<TradingPipeline> {
    let services = backend.services().context("Failed to build HTTP client")?;
    TradingPipeline::connect(config, services).context("Failed to assemble pipeline")
}

#[derive(Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    subject: &'a str,
    as_of: String,
    signal: String,
    status: &'a RunStatus,
    visits: usize,
    audit_path: Option<String>,
}

/// Run the pipeline, streaming node events as they are applied.
async fn cmd_run(
    config: PipelineConfig,
    backend: &BackendConfig,
    ticker: &str,
    date: NaiveDate,
    record_out: Option<&Path>,
    summary_out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let pipeline = connect(config, backend)?;
    let (handle, token) = cancellation();
    let driver = Arc::new(pipeline.driver()?.with_cancellation(token));
    let record = driver.plan().initial_record(ticker, date);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let (mut events, run) = Arc::clone(&driver).stream(record);
    while let Some(event) = events.next().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", render_event(&event));
        }
    }
    let outcome = run.await.context("Run task did not complete")?;

    if let Some(path) = record_out {
        std::fs::write(path, serde_json::to_string_pretty(&outcome.record)?)
            .with_context(|| format!("Failed to write record to {:?}", path))?;
        info!(path = %path.display(), "record written");
    }
    if let Some(path) = summary_out {
        std::fs::write(path, render_summary_md(&outcome.record))
            .with_context(|| format!("Failed to write summary to {:?}", path))?;
    }

    let summary = RunSummary {
        run_id: &outcome.run_id,
        subject: outcome.record.subject(),
        as_of: outcome.record.as_of().to_string(),
        signal: outcome.signal().to_string(),
        status: &outcome.status,
        visits: outcome.visits.len(),
        audit_path: outcome.audit_path.as_ref().map(|p| p.display().to_string()),
    };
    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!();
        println!("{} {}: {}", summary.subject, summary.as_of, summary.signal);
        if let Some(path) = &summary.audit_path {
            println!("Audit log: {path}");
        }
    }

    match &outcome.status {
        RunStatus::Completed { .. } => Ok(()),
        RunStatus::Failed { node, error } => match node {
            Some(node) => anyhow::bail!("Run failed at {node}: {error}"),
            None => anyhow::bail!("Run failed: {error}"),
        },
        RunStatus::Cancelled { .. } => anyhow::bail!("Run cancelled"),
    }
}

/// One line per event for terminal output.
fn render_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Node { seq, node, delta } => {
            let text = update_text(&delta.update);
            let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            format!("[{seq:>2}] {:<20} {}", node.to_string(), truncate(first, 80))
        }
        StreamEvent::Finished { seq, status, .. } => {
            let label = match status {
                RunStatus::Completed { degraded: false } => "completed".to_string(),
                RunStatus::Completed { degraded: true } => "completed (degraded)".to_string(),
                RunStatus::Failed { error, .. } => format!("failed: {error}"),
                RunStatus::Cancelled { .. } => "cancelled".to_string(),
            };
            format!("[{seq:>2}] {label}")
        }
    }
}

fn update_text(update: &RecordUpdate) -> String {
    match update {
        RecordUpdate::Report { report, .. } => report.render(),
        RecordUpdate::ResearchPlan { text }
        | RecordUpdate::BullArgument { text }
        | RecordUpdate::BearArgument { text }
        | RecordUpdate::TraderPlan { text }
        | RecordUpdate::RiskArgument { text, .. }
        | RecordUpdate::JudgeDecision { text }
        | RecordUpdate::RiskDecision { text } => text.clone(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn require_memory_dir(config: &PipelineConfig) -> Result<()> {
    if config.memory_dir.is_none() {
        anyhow::bail!("memory_dir must be set in the configuration to use persisted memories");
    }
    Ok(())
}

/// Reflect on a saved record and store per-role lessons.
async fn cmd_reflect(
    config: PipelineConfig,
    backend: &BackendConfig,
    record_path: &Path,
    returns_pct: f64,
    note: Option<String>,
    json: bool,
) -> Result<()> {
    require_memory_dir(&config)?;
    let raw = std::fs::read_to_string(record_path)
        .with_context(|| format!("Failed to read record: {:?}", record_path))?;
    let record: AnalysisRecord = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid record JSON in {:?}", record_path))?;

    let pipeline = connect(config, backend)?;
    let report = pipeline
        .reflector()
        .reflect(&record, &Outcome { returns_pct, note })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for lesson in &report.stored {
            println!("{:<18} #{:<4} {}", lesson.role.to_string(), lesson.id, truncate(&lesson.lesson, 80));
        }
        for role in &report.skipped {
            println!("{:<18} skipped", role.to_string());
        }
    }
    Ok(())
}

/// Print the closest stored lessons for a role.
async fn cmd_recall(
    config: PipelineConfig,
    backend: &BackendConfig,
    role: MemoryRole,
    query: &str,
    k: usize,
    json: bool,
) -> Result<()> {
    require_memory_dir(&config)?;
    let pipeline = connect(config, backend)?;
    let store = pipeline
        .memories()
        .get(role)
        .with_context(|| format!("No memory store for role {role}"))?;
    let matches = store.retrieve(query, k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
    } else if matches.is_empty() {
        println!("No lessons stored for {role}.");
    } else {
        for m in matches {
            println!("#{:<4} {:.3}  {}", m.id, m.similarity, m.recommendation);
        }
    }
    Ok(())
}

fn cmd_signal(text: Option<String>, json: bool) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    let signal = SignalExtractor::extract(&text);
    if json {
        println!("{}", serde_json::json!({ "signal": signal }));
    } else {
        println!("{signal}");
    }
    Ok(())
}

fn cmd_plan(config: PipelineConfig, backend: &BackendConfig, json: bool) -> Result<()> {
    let pipeline = connect(config, backend)?;
    let plan = pipeline.compile()?;
    let visits: Vec<String> = plan.expected_visits().iter().map(|n| n.to_string()).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&visits)?);
    } else {
        for (i, node) in visits.iter().enumerate() {
            println!("{:>2}. {node}", i + 1);
        }
    }
    Ok(())
}

fn cmd_config(config: &PipelineConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
