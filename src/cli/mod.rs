pub mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

pub use config::{SopflowConfig, StoreConfig, StoreKind};

use crate::engine::types::{ControlSignal, Environment, TaskStatus};
use crate::engine::{Bootstrapper, audit_sop};
use crate::storage::{RecordStore, Table, TaskStore, TaskUpdate};
use crate::tools::ToolRegistry;
use crate::tools::builtin::GenerateImageTool;

#[derive(Parser)]
#[command(name = "sopflow", version, about = "Continuous SOP task runtime")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to a sopflow.yaml config file (default: auto-detect in cwd)
    #[arg(long, global = true, env = "SOPFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Record store backend (overrides the config file)
    #[arg(long, global = true, value_enum, env = "SOPFLOW_STORE")]
    store: Option<StoreKind>,

    /// JSON store directory
    #[arg(long, global = true, env = "SOPFLOW_STORE_DIR")]
    store_dir: Option<String>,

    /// SQL store URL
    #[arg(long, global = true, env = "SOPFLOW_STORE_URL")]
    store_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the continuous runtime for an agent until Ctrl-C
    Run {
        /// Agent whose tasks are driven
        #[arg(short, long, env = "SOPFLOW_AGENT")]
        agent: Option<String>,

        /// Process a single tick and exit
        #[arg(long)]
        once: bool,

        /// Poll interval in seconds
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// List an agent's tasks
    Tasks {
        #[arg(short, long, env = "SOPFLOW_AGENT")]
        agent: Option<String>,

        /// Filter by status (pending, running, waiting, paused, stopped, completed, error)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Print a task record
    Inspect {
        task_id: String,
    },

    /// Create a new task
    Create {
        #[arg(short, long, env = "SOPFLOW_AGENT")]
        agent: Option<String>,

        /// First step to run
        #[arg(long)]
        start_step: String,

        /// Initial environment as a JSON object
        #[arg(short, long)]
        env: Option<String>,

        /// Task id (default: a new UUID)
        #[arg(long)]
        id: Option<String>,

        /// Initial status (running, or pending to park the task until resumed)
        #[arg(long, default_value = "running")]
        status: String,
    },

    /// Ask the runtime to pause a task
    Pause {
        task_id: String,
    },

    /// Ask the runtime to stop a task
    Stop {
        task_id: String,
    },

    /// Resume a paused task or start a pending one
    Resume {
        task_id: String,
    },

    /// Import SOP step definitions from a YAML or JSON file
    Import {
        file: PathBuf,
    },

    /// Walk an SOP from a start step and report problems
    Validate {
        start_step: String,
    },

    /// List available tools
    Tools,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let mut config = SopflowConfig::load(cli.config.as_deref())?;
    if let Some(kind) = cli.store {
        config.store.kind = Some(kind);
    }
    if let Some(dir) = cli.store_dir {
        config.store.dir = Some(dir);
    }
    if let Some(url) = cli.store_url {
        config.store.url = Some(url);
    }

    match cli.command {
        Commands::Run {
            agent,
            once,
            poll_interval,
        } => cmd_run(&config, agent, once, poll_interval).await,
        Commands::Tasks {
            agent,
            status,
            format,
        } => cmd_tasks(&config, agent, status, format).await,
        Commands::Inspect { task_id } => cmd_inspect(&config, task_id).await,
        Commands::Create {
            agent,
            start_step,
            env,
            id,
            status,
        } => cmd_create(&config, agent, start_step, env, id, status).await,
        Commands::Pause { task_id } => cmd_signal(&config, task_id, ControlSignal::Pause).await,
        Commands::Stop { task_id } => cmd_signal(&config, task_id, ControlSignal::Stop).await,
        Commands::Resume { task_id } => cmd_resume(&config, task_id).await,
        Commands::Import { file } => cmd_import(&config, file).await,
        Commands::Validate { start_step } => cmd_validate(&config, start_step).await,
        Commands::Tools => cmd_tools(&config).await,
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (warn if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

fn resolve_agent(config: &SopflowConfig, agent: Option<String>) -> Result<String> {
    agent
        .or_else(|| config.agent_name.clone())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!("No agent name given (use --agent or agent_name in sopflow.yaml)")
        })
}

/// Built-in tools, the store tools, and a configured image API endpoint.
pub fn build_registry(config: &SopflowConfig, records: Arc<dyn RecordStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::with_store(records);
    if let Some(url) = &config.image_api_url {
        registry.register(Arc::new(GenerateImageTool::new(url.clone())));
    }
    registry
}

async fn cmd_run(
    config: &SopflowConfig,
    agent: Option<String>,
    once: bool,
    poll_interval: Option<u64>,
) -> Result<()> {
    let agent = resolve_agent(config, agent)?;
    let records = config.store.open().await?;
    let registry = Arc::new(build_registry(config, records.clone()));

    let mut scheduler = Bootstrapper::new(agent.clone(), TaskStore::new(records), registry)
        .with_required_tools(config.required_tools())
        .bootstrap(config.scheduler_config(poll_interval))
        .await?;

    if once {
        let summary = scheduler.tick().await?;
        println!(
            "Agent: {}  processed: {}  dropped: {}  still tracked: {}",
            agent,
            summary.processed,
            summary.dropped.len(),
            scheduler.tracked().len()
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}

async fn cmd_tasks(
    config: &SopflowConfig,
    agent: Option<String>,
    status_filter: Option<String>,
    format: String,
) -> Result<()> {
    let agent = agent.or_else(|| config.agent_name.clone());
    let status = status_filter
        .as_deref()
        .map(|s| s.parse::<TaskStatus>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()?;

    let store = TaskStore::new(config.store.open().await?);
    let tasks = store.list_tasks(agent.as_deref(), status).await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    println!(
        "{:<38} {:<16} {:<10} {:<20} {:<26}",
        "TASK ID", "AGENT", "STATUS", "STEP", "UPDATED"
    );
    println!("{}", "-".repeat(112));

    for task in &tasks {
        println!(
            "{:<38} {:<16} {:<10} {:<20} {:<26}",
            task.task_id,
            task.agent_name,
            task.status,
            task.current_step_id.as_deref().unwrap_or("-"),
            task.last_updated.as_deref().unwrap_or("-")
        );
    }

    println!("\nTotal: {} task(s)", tasks.len());
    Ok(())
}

async fn cmd_inspect(config: &SopflowConfig, task_id: String) -> Result<()> {
    let records = config.store.open().await?;
    let record = records
        .fetch_record(Table::AgentTasks, &task_id)
        .await?
        .with_context(|| format!("Task '{}' not found", task_id))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_create(
    config: &SopflowConfig,
    agent: Option<String>,
    start_step: String,
    env_json: Option<String>,
    id: Option<String>,
    status: String,
) -> Result<()> {
    let agent = resolve_agent(config, agent)?;
    let status: TaskStatus = status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    if !matches!(status, TaskStatus::Pending | TaskStatus::Running) {
        anyhow::bail!("New tasks must start as pending or running, not {}", status);
    }

    let env: Environment = match env_json {
        Some(json) => serde_json::from_str(&json).with_context(|| "Failed to parse --env JSON")?,
        None => Environment::new(),
    };
    let task_id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let store = TaskStore::new(config.store.open().await?);
    if store.fetch_step(&start_step).await?.is_none() {
        warn!(step_id = %start_step, "Start step does not exist yet");
    }
    let task_id = store
        .create_task(&task_id, &agent, status, Some(&start_step), &env)
        .await?;

    println!("Created task {} for agent {} at step {}", task_id, agent, start_step);
    Ok(())
}

async fn cmd_signal(config: &SopflowConfig, task_id: String, signal: ControlSignal) -> Result<()> {
    let store = TaskStore::new(config.store.open().await?);
    let task = store
        .fetch_task(&task_id)
        .await?
        .with_context(|| format!("Task '{}' not found", task_id))?;

    if task.status.is_terminal() {
        anyhow::bail!("Task '{}' has already finished ({})", task_id, task.status);
    }

    store
        .update_task(&task_id, TaskUpdate::new().control_signal(signal))
        .await?;
    println!("Signal {} set on task {}", signal, task_id);
    Ok(())
}

async fn cmd_resume(config: &SopflowConfig, task_id: String) -> Result<()> {
    let store = TaskStore::new(config.store.open().await?);
    let task = store
        .fetch_task(&task_id)
        .await?
        .with_context(|| format!("Task '{}' not found", task_id))?;

    if !matches!(task.status, TaskStatus::Paused | TaskStatus::Pending) {
        anyhow::bail!("Task '{}' is not paused or pending ({})", task_id, task.status);
    }

    let update = TaskUpdate::new()
        .status(TaskStatus::Running)
        .control_signal(ControlSignal::None);
    store.update_task(&task_id, update).await?;
    println!("Resumed task {}", task_id);
    Ok(())
}

async fn cmd_import(config: &SopflowConfig, file: PathBuf) -> Result<()> {
    let contents = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let steps = parse_step_file(&contents)
        .with_context(|| format!("Failed to parse steps from {}", file.display()))?;

    let store = TaskStore::new(config.store.open().await?);
    for step in steps {
        let id = store.put_step(step).await?;
        println!("  imported {}", id);
    }
    Ok(())
}

/// A step file is either a list of step objects or `{ steps: [...] }`.
pub fn parse_step_file(contents: &str) -> Result<Vec<serde_json::Map<String, Value>>> {
    let value: Value = serde_yml::from_str(contents)?;
    let list = match value {
        Value::Array(list) => list,
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(list)) => list,
            _ => anyhow::bail!("Expected a list of steps or a 'steps' list"),
        },
        _ => anyhow::bail!("Expected a list of steps or a 'steps' list"),
    };

    list.into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("Step #{} is not a mapping: {}", i + 1, other),
        })
        .collect()
}

async fn cmd_validate(config: &SopflowConfig, start_step: String) -> Result<()> {
    let records = config.store.open().await?;
    let registry = build_registry(config, records.clone());
    let store = TaskStore::new(records);

    let report = audit_sop(&store, &registry, std::slice::from_ref(&start_step)).await?;

    println!("Start: {}", start_step);
    println!("Reachable steps: {}", report.visited.len());
    for step_id in &report.visited {
        println!("  {}", step_id);
    }
    if !report.cycles.is_empty() {
        println!("\nCycles closed by: {}", report.cycles.join(", "));
    }

    if report.is_clean() {
        println!("\nValidation: OK");
        return Ok(());
    }

    println!("\nValidation: FAILED");
    for step_id in &report.missing_steps {
        println!("  - step '{}' does not exist", step_id);
    }
    for (step_id, tool) in &report.unknown_tools {
        println!("  - step '{}' uses unknown tool '{}'", step_id, tool);
    }
    for (step_id, reason) in &report.invalid_steps {
        println!("  - step '{}' is invalid: {}", step_id, reason);
    }
    let count =
        report.missing_steps.len() + report.unknown_tools.len() + report.invalid_steps.len();
    anyhow::bail!("{} validation error(s) found", count);
}

async fn cmd_tools(config: &SopflowConfig) -> Result<()> {
    let registry = build_registry(config, config.store.open().await?);
    let tools = registry.list();

    println!("{:<20} DESCRIPTION", "TOOL");
    println!("{}", "-".repeat(60));

    for (name, desc) in &tools {
        println!("{:<20} {}", name, desc);
    }

    println!("\nTotal: {} tool(s)", tools.len());
    Ok(())
}
