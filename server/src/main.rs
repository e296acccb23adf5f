use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cycle_core::{
    models::TaskFilter,
    states::{TaskState, ALL_STATES},
    store::{AgentStore, ArtifactStore, TaskStore},
};
use cycle_engine::{AuditLogger, CycleEngine, CycleResult};
use database::SqliteStore;
use relay_server::{
    config::Config,
    ingest::{ingest_plan, load_plan},
    runner::ProcessRunner,
    telemetry::{init_telemetry, log_startup_info},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Cycle engine for LLM-driven software work")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG_FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the workspace: database, migrations, agent table
    Init,

    /// Ingest the externally-parsed plan payload
    Ingest {
        /// Plan file path (defaults to plan_file from the configuration)
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Inspect and update tasks
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },

    /// Run one cycle
    Cycle {
        /// Select and predict without invoking the agent or persisting
        #[arg(long)]
        dry_run: bool,

        /// Override llm.timeout_seconds for this cycle
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show workspace status
    Status,
}

#[derive(Subcommand)]
enum TasksCommand {
    /// List tasks, optionally filtered
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        min_priority: Option<i64>,
    },

    /// Show one task with artifacts and audit history
    Show { id: String },

    /// Transition a task through the validator
    SetState {
        id: String,
        state: String,
        #[arg(long)]
        note: Option<String>,
    },

    /// Append a note without changing state
    Note { id: String, note: String },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    init_telemetry(&config.logging)?;
    config.validate()?;
    log_startup_info(&config);

    match cli.command {
        Command::Init => init_workspace(&config).await,
        Command::Ingest { plan } => ingest(&config, plan).await,
        Command::Tasks { command } => tasks(&config, command).await,
        Command::Cycle { dry_run, timeout } => cycle(&config, dry_run, timeout).await,
        Command::Status => status(&config).await,
    }
}

async fn init_workspace(config: &Config) -> Result<()> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let store = SqliteStore::new(&config.database_url())
        .await
        .context("failed to open database")?;
    store.migrate().await.context("migrations failed")?;

    let roles = config.role_table();
    store
        .sync_agents(roles.roles())
        .await
        .context("failed to sync agent roles")?;

    info!(database = %db_path.display(), "workspace initialized");
    println!("initialized workspace at {}", config.workspace.display());
    println!("  database: {}", db_path.display());
    println!("  agent roles: {}", roles.roles().len());
    Ok(())
}

/// Open the store for a command that requires an initialized workspace.
async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let db_path = config.database_path();
    if !db_path.exists() {
        anyhow::bail!(
            "workspace not initialized ({} missing); run `relay init` first",
            db_path.display()
        );
    }

    let store = SqliteStore::new(&config.database_url())
        .await
        .context("failed to open database")?;
    store.migrate().await.context("migrations failed")?;
    Ok(Arc::new(store))
}

async fn ingest(config: &Config, plan: Option<PathBuf>) -> Result<()> {
    let path = plan
        .or_else(|| config.plan_file.clone())
        .context("no plan file: pass --plan or set plan_file in the configuration")?;

    let store = open_store(config).await?;
    let payload = load_plan(&path)?;
    let summary = ingest_plan(store.as_ref(), payload).await?;

    println!(
        "ingested {}: {} requirements, {} tasks, {} links ({} already present)",
        path.display(),
        summary.requirements,
        summary.tasks,
        summary.links,
        summary.skipped
    );
    Ok(())
}

async fn tasks(config: &Config, command: TasksCommand) -> Result<()> {
    let store = open_store(config).await?;

    match command {
        TasksCommand::List {
            state,
            owner,
            min_priority,
        } => {
            let state = state.map(|raw| TaskState::parse(&raw)).transpose()?;
            let tasks = store
                .list_tasks(TaskFilter {
                    state,
                    owner,
                    min_priority,
                    limit: None,
                    offset: None,
                })
                .await?;

            if tasks.is_empty() {
                println!("no tasks match");
                return Ok(());
            }

            for task in tasks {
                println!(
                    "{:<12} p{:<3} {:<24} {}",
                    task.id, task.priority, task.state.to_string(), task.title
                );
            }
        }

        TasksCommand::Show { id } => {
            let task = store
                .get_task(&id)
                .await?
                .with_context(|| format!("task '{id}' not found"))?;

            println!("{} — {}", task.id, task.title);
            println!("  state:        {}", task.state);
            println!("  priority:     {}", task.priority);
            if !task.owner.is_empty() {
                println!("  owner:        {}", task.owner);
            }
            if !task.dependencies.is_empty() {
                println!("  dependencies: {}", task.dependencies.join(", "));
            }
            println!("  updated:      {}", task.updated_at.to_rfc3339());
            println!();
            println!("{}", task.description);

            let artifacts = store.list_artifacts(&id).await?;
            if !artifacts.is_empty() {
                println!();
                println!("artifacts:");
                for artifact in artifacts {
                    println!("  {artifact}");
                }
            }

            if !task.notes.is_empty() {
                println!();
                println!("notes:");
                for note in &task.notes {
                    println!("  [{}] {}", note.created_at.to_rfc3339(), note.text);
                }
            }

            let history = AuditLogger::new(store.clone()).history(&id).await?;
            if !history.is_empty() {
                println!();
                println!("cycles:");
                for entry in history {
                    println!(
                        "  {} {} -> {} ({}, {})",
                        entry.created_at.to_rfc3339(),
                        entry.prev_state,
                        entry.next_state,
                        entry.actor,
                        entry.result
                    );
                }
            }
        }

        TasksCommand::SetState { id, state, note } => {
            let target = TaskState::parse(&state)?;
            let task = store
                .validate_and_transition(&id, target, note.as_deref())
                .await?;
            println!("{} is now {}", task.id, task.state);
        }

        TasksCommand::Note { id, note } => {
            let task = store.append_note(&id, &note).await?;
            println!("noted on {} ({} notes)", task.id, task.notes.len());
        }
    }

    Ok(())
}

async fn cycle(config: &Config, dry_run: bool, timeout: Option<u64>) -> Result<()> {
    if config.agents.is_empty() {
        anyhow::bail!("no agent roles configured; add [agents.<name>] sections");
    }

    let store = open_store(config).await?;

    let mut engine_config = config.engine_config();
    if let Some(timeout) = timeout {
        engine_config.llm_timeout = std::time::Duration::from_secs(timeout.max(1));
    }

    let runner = Arc::new(ProcessRunner::from_config(config)?);
    let engine = CycleEngine::new(store, runner, config.role_table(), engine_config)?;

    let result = engine.execute(dry_run).await?;
    print_cycle_result(&result);
    Ok(())
}

fn print_cycle_result(result: &CycleResult) {
    let header = if result.dry_run {
        format!("{} (dry run)", result.cycle_id)
    } else {
        result.cycle_id.clone()
    };

    println!("{header}");
    println!("  task:       {} — {}", result.task_id, result.task_title);
    println!("  selection:  {}", result.selection_reason);
    if result.dry_run {
        println!(
            "  predicted:  {} -> {}",
            result.prev_state, result.next_state
        );
    } else {
        println!(
            "  transition: {} -> {}",
            result.prev_state, result.next_state
        );
    }
    println!(
        "  outcome:    {} ({} artifacts, {} follow-ups, {:.1}s)",
        result.outcome,
        result.artifacts_created.len(),
        result.follow_ups,
        result.duration.as_secs_f64()
    );
    for artifact in &result.artifacts_created {
        println!("  produced:   {artifact}");
    }
}

async fn status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    store.health_check().await?;

    let audit = AuditLogger::new(store.clone());
    let report = audit.report().await?;
    println!("tasks: {} total", report.total_tasks);
    for state in ALL_STATES {
        if let Some(count) = report.tasks_by_state.get(&state) {
            println!("  {:<24} {}", state.to_string(), count);
        }
    }
    println!(
        "completion: {:.0}% ({} cycles recorded)",
        report.completion_rate * 100.0,
        report.total_cycles
    );

    let agents = store.list_agents().await?;
    if !agents.is_empty() {
        println!("agent roles:");
        for role in agents {
            println!(
                "  {:<12} handles [{}]",
                role.name,
                role.handles_states
                    .iter()
                    .map(TaskState::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    let recent = audit.recent(5).await?;
    if !recent.is_empty() {
        println!("recent cycles:");
        for entry in recent {
            println!(
                "  {} {} {} -> {} ({})",
                entry.created_at.to_rfc3339(),
                entry.task_id,
                entry.prev_state,
                entry.next_state,
                entry.result
            );
        }
    }

    Ok(())
}
