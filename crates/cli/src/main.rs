//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: validate a workflow JSON file and print its execution order.
//! - `run`: execute a workflow JSON file and print the execution record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{
    plan_execution, validate_workflow, ActiveRuns, ExecutionOptions, ExecutorConfig, Workflow,
    WorkflowExecutor,
};
use nodes::{DispatcherRegistry, PassthroughDispatcher};

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "Run and validate automation workflows",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition JSON file.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the workflow JSON file.
    path: PathBuf,

    /// Organization the run is attributed to.
    #[arg(long, env = "WORKFLOW_ORG_ID")]
    org: String,

    /// User who started the run.
    #[arg(long, env = "WORKFLOW_USER_ID")]
    user: Option<String>,

    /// Trigger payload: inline JSON, or `@path` to read it from a file.
    #[arg(long)]
    payload: Option<String>,

    /// Ask dispatchers not to cause external side effects.
    #[arg(long)]
    dry_run: bool,

    /// Advisory per-run timeout handed to dispatchers.
    #[arg(long, default_value_t = 300_000)]
    timeout_ms: u64,

    /// Retries per node for retryable failures.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Base delay for exponential back-off between retries.
    #[arg(long, env = "WORKFLOW_RETRY_BASE_DELAY_MS", default_value_t = 100)]
    retry_base_delay_ms: u64,

    /// Fail the run when a branch predicate cannot be evaluated.
    #[arg(long)]
    fail_on_condition_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Run(args) => run(args).await,
    }
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn parse_payload(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(file) => std::fs::read_to_string(file).with_context(|| format!("cannot read payload file {file}"))?,
        None => raw.to_owned(),
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}

fn validate(path: &Path) -> Result<()> {
    let workflow = load_workflow(path)?;

    let report = validate_workflow(&workflow);
    if !report.is_valid {
        for error in &report.errors {
            eprintln!("❌ {error}");
        }
        bail!("workflow '{}' is invalid ({} errors)", workflow.name, report.errors.len());
    }

    let plan = plan_execution(&workflow)?;
    println!("✅ Workflow is valid. Execution order: {:?}", plan.order());
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let workflow = load_workflow(&args.path)?;

    let mut options = ExecutionOptions::new(args.org)
        .with_timeout_ms(args.timeout_ms)
        .with_max_retries(args.max_retries)
        .dry_run(args.dry_run);
    if let Some(user) = args.user {
        options = options.with_user(user);
    }
    if let Some(raw) = args.payload.as_deref() {
        options = options.with_payload(parse_payload(raw)?);
    }

    let config = ExecutorConfig {
        retry_base_delay_ms: args.retry_base_delay_ms,
        fail_on_condition_error: args.fail_on_condition_error,
    };

    // Only pass-through dispatch ships with the CLI; real integrations
    // register their own node types.
    let dispatcher = DispatcherRegistry::new().with_fallback(Arc::new(PassthroughDispatcher));
    let executor = Arc::new(WorkflowExecutor::new(Arc::new(dispatcher), ActiveRuns::shared(), config));

    tokio::spawn({
        let executor = Arc::clone(&executor);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                for id in executor.active_executions() {
                    if executor.cancel_execution(id) {
                        warn!(execution_id = %id, "cancelled by interrupt");
                    }
                }
            }
        }
    });

    info!(workflow = %workflow.name, "starting run");
    let result = executor.execute_workflow(&workflow, options).await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!(
            "execution {} ended {}{}",
            result.execution.id,
            result.execution.status,
            result.error.map(|e| format!(": {e}")).unwrap_or_default()
        );
    }
    Ok(())
}
