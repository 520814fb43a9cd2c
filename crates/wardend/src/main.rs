//! wardend - run a governed workflow template
//!
//! Wires the components together:
//! - Configuration loading
//! - SQLite audit sink
//! - HTTP tool executor
//! - Orchestrator
//!
//! Runs one template for one session and prints the run, the session's
//! compliance report and the aggregate metrics as JSON. Without a template
//! it prints the configured templates.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden_config::load_config;
use warden_core::{AuditMonitor, Orchestrator};
use warden_executor::HttpExecutor;
use warden_store::{AuditSink, SqliteAuditSink};
use warden_util::{SessionId, ToolName, default_config_path};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// wardend - policy-governed tool orchestration
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(about = "Run a workflow template under tool-call policy enforcement", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/toolwarden/config.toml)
    #[arg(short, long, env = "WARDEN_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set WARDEN_DATA_DIR env var)
    #[arg(short, long, env = "WARDEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Workflow template to run (omit to list templates)
    #[arg(short, long)]
    template: Option<String>,

    /// Session identifier (default: a fresh one per run)
    #[arg(short, long)]
    session: Option<String>,

    /// Approve a gated tool before the run (repeatable)
    #[arg(short, long = "approve")]
    approve: Vec<String>,

    /// JSON arguments passed to every step
    #[arg(long, default_value = "{}")]
    arguments: String,
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        config_path = %args.config.display(),
        tools = config.tools.len(),
        templates = config.templates.len(),
        "Configuration loaded"
    );

    let arguments: Value = serde_json::from_str(&args.arguments)
        .with_context(|| format!("Invalid JSON arguments: {}", args.arguments))?;

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| config.service.data_dir.clone());
    let db_path = data_dir.join("audit.db");
    let sink: Arc<dyn AuditSink> = Arc::new(
        SqliteAuditSink::open(&db_path)
            .with_context(|| format!("Failed to open audit database {:?}", db_path))?,
    );
    info!(db_path = %db_path.display(), "Audit sink initialized");

    let audit = Arc::new(AuditMonitor::new(config.audit.clone()).with_sink(sink));
    let executor = Arc::new(
        HttpExecutor::new(config.endpoints(), CONNECT_TIMEOUT)
            .context("Failed to build HTTP executor")?,
    );
    let orchestrator = Orchestrator::from_config(config, executor, audit.clone());

    let Some(template) = args.template.as_deref() else {
        let templates: Vec<Value> = orchestrator
            .list_templates()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "steps": t.execution_order(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    };

    let session_id = SessionId::new(
        args.session
            .clone()
            .unwrap_or_else(|| format!("wardend-{}", warden_util::CallId::new())),
    );

    for tool in &args.approve {
        orchestrator
            .grant_approval(&session_id, &ToolName::new(tool.as_str()))
            .with_context(|| format!("Cannot approve {}", tool))?;
    }

    let run = tokio::select! {
        run = orchestrator.execute_template(&session_id, template, arguments) => {
            run.with_context(|| format!("Failed to run template {}", template))?
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(session_id = %session_id, "Interrupted, in-flight call recorded as cancelled");
            let flushed = audit.flush();
            info!(flushed, "Audit backlog flushed");
            anyhow::bail!("interrupted");
        }
    };

    let report = orchestrator.compliance_report(&session_id)?;
    let metrics = orchestrator.aggregate_metrics();
    if metrics.has_alerts() {
        for alert in &metrics.alerts {
            warn!(
                metric = ?alert.metric,
                observed = alert.observed_per_hour,
                threshold = alert.threshold_per_hour,
                "Audit threshold exceeded"
            );
        }
    }

    let output = json!({
        "run": run,
        "compliance": report,
        "metrics": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    let flushed = audit.flush();
    if audit.backlog_len() > 0 {
        warn!(
            pending = audit.backlog_len(),
            "Some audit events could not be persisted"
        );
    } else {
        info!(flushed, "Audit log persisted");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "wardend starting");
    if warden_util::is_mock_time_active() {
        warn!("Mock time is active, audit timestamps are shifted");
    }

    run(args).await
}
