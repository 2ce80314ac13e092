//! Roundtable CLI
//!
//! The `roundtable` command drives a team of roles over a workspace
//! directory holding snapshots and artifacts.
//!
//! ## Commands
//!
//! - `run`: start a project from an idea and run rounds
//! - `resume`: continue from the latest (or a given) snapshot
//! - `inspect`: summarize a committed snapshot
//! - `plan-check`: dry-run a task-list proposal against a plan

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

use roundtable_core::{
    parse_task_proposal, BudgetGuard, Plan, RunContext, RunSummary, ScriptedGenerator, Task,
    Team, TeamConfig, TeamSnapshot,
};
use roundtable_state::{
    ArtifactStore, FsArtifactStore, FsSnapshotStore, SnapshotRecord, SnapshotStore,
};

#[derive(Parser)]
#[command(name = "roundtable")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Round-based multi-role coordination", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that run rounds.
#[derive(Args, Debug, Clone)]
struct RunOptions {
    /// Team configuration (TOML)
    #[arg(long, env = "ROUNDTABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding snapshots and artifacts
    #[arg(long, env = "ROUNDTABLE_WORKSPACE", default_value = ".roundtable")]
    workspace: PathBuf,

    /// Scripted generator responses (JSON, keyed by action)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Override the budget cap
    #[arg(long)]
    investment: Option<f64>,

    /// Override the number of rounds
    #[arg(long)]
    n_rounds: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a project from an idea
    Run {
        /// The idea handed to the team
        #[arg(long)]
        idea: String,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Continue a project from a committed snapshot
    Resume {
        /// Snapshot id or unique prefix (default: latest)
        #[arg(long)]
        snapshot: Option<String>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Summarize a committed snapshot
    Inspect {
        /// Snapshot id or unique prefix (default: latest)
        #[arg(long)]
        snapshot: Option<String>,

        /// Directory holding snapshots and artifacts
        #[arg(long, env = "ROUNDTABLE_WORKSPACE", default_value = ".roundtable")]
        workspace: PathBuf,
    },

    /// Check a task-list proposal against a plan without saving anything
    PlanCheck {
        /// Current plan: JSON list of tasks
        #[arg(long)]
        plan: PathBuf,

        /// Generated text containing the proposal
        #[arg(long)]
        proposal: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    roundtable_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { idea, options } => cmd_run(&idea, &options).await,
        Commands::Resume { snapshot, options } => {
            cmd_resume(snapshot.as_deref(), &options).await
        }
        Commands::Inspect {
            snapshot,
            workspace,
        } => cmd_inspect(&workspace, snapshot.as_deref()).await,
        Commands::PlanCheck { plan, proposal } => cmd_plan_check(&plan, &proposal),
    }
}

struct Workspace {
    snapshots: Arc<FsSnapshotStore>,
    artifacts: Arc<FsArtifactStore>,
}

fn open_workspace(root: &Path) -> Result<Workspace> {
    let snapshots = FsSnapshotStore::new(root.join("snapshots"))
        .with_context(|| format!("Failed to open snapshot store under {:?}", root))?;
    let artifacts = FsArtifactStore::new(root.join("artifacts"))
        .with_context(|| format!("Failed to open artifact store under {:?}", root))?;
    Ok(Workspace {
        snapshots: Arc::new(snapshots),
        artifacts: Arc::new(artifacts),
    })
}

fn load_config(options: &RunOptions) -> Result<TeamConfig> {
    let mut config = match &options.config {
        Some(path) => TeamConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => TeamConfig::default(),
    };
    if let Some(investment) = options.investment {
        config.investment = investment;
    }
    if let Some(n_rounds) = options.n_rounds {
        config.n_rounds = n_rounds;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_generator(script: Option<&Path>) -> Result<Arc<ScriptedGenerator>> {
    let generator = match script {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read script {:?}", path))?;
            ScriptedGenerator::from_json(&json)
                .with_context(|| format!("Script {:?} is not a valid response script", path))?
        }
        None => {
            warn!("no --script given; every generation call will report an exhausted script");
            ScriptedGenerator::new()
        }
    };
    Ok(Arc::new(generator))
}

/// Pick a snapshot by full id or unique prefix, or the latest one.
async fn resolve_snapshot(
    store: &dyn SnapshotStore,
    reference: Option<&str>,
) -> Result<SnapshotRecord> {
    let Some(reference) = reference else {
        return store
            .latest()
            .await?
            .context("No snapshot found. Run 'roundtable run' first.");
    };
    let matches: Vec<SnapshotRecord> = store
        .list()
        .await?
        .into_iter()
        .filter(|r| r.id.as_str().starts_with(reference))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("Snapshot not found: {}", reference),
        [only] => Ok(only.clone()),
        [first, rest @ ..] => {
            // identical documents share an id and may be listed more than once
            if rest.iter().all(|r| r.id == first.id) {
                Ok(first.clone())
            } else {
                anyhow::bail!("Snapshot prefix '{}' is ambiguous", reference)
            }
        }
    }
}

fn print_summary(team: &Team, summary: &RunSummary) {
    println!(
        "Ran {} round(s), stopped: {:?}",
        summary.rounds_run, summary.stop
    );
    for report in &summary.reports {
        println!(
            "  round {}: {} message(s), {} idle, {} failed",
            report.round,
            report.produced.len(),
            report.idle.len(),
            report.failures.len()
        );
        for failure in &report.failures {
            println!("    {}: {}", failure.role, failure.error);
        }
    }
    let budget = team.budget().snapshot();
    println!("Budget: spent {:.4} of {:.4}", budget.spent, budget.cap);
    if let Some(record) = &summary.last_snapshot {
        println!("Snapshot: {} ({})", record.id.short(), record.label);
    }
}

/// Start a project and run it
async fn cmd_run(idea: &str, options: &RunOptions) -> Result<()> {
    let config = load_config(options)?;
    let workspace = open_workspace(&options.workspace)?;
    let generator = load_generator(options.script.as_deref())?;

    let mut team = Team::from_config(
        &config,
        generator,
        workspace.artifacts.clone(),
        workspace.snapshots.clone(),
    )?;
    let start = team
        .run_project(idea, None)
        .await
        .context("Failed to start project")?;
    info!(snapshot = %start.id.short(), "project started");

    let summary = team.run(config.n_rounds).await.with_context(|| {
        format!(
            "Team halted; resume with 'roundtable resume --workspace {}'",
            options.workspace.display()
        )
    })?;
    print_summary(&team, &summary);
    Ok(())
}

/// Resume from a snapshot and keep running
async fn cmd_resume(snapshot: Option<&str>, options: &RunOptions) -> Result<()> {
    let config = load_config(options)?;
    let workspace = open_workspace(&options.workspace)?;
    let generator = load_generator(options.script.as_deref())?;
    let record = resolve_snapshot(workspace.snapshots.as_ref(), snapshot).await?;

    let ctx = RunContext::new(
        generator,
        Arc::new(BudgetGuard::new(config.investment)),
        workspace.artifacts.clone(),
    )
    .with_generation(config.generation.clone())
    .with_cost(config.cost)
    .with_max_context_messages(config.context.max_messages);

    let mut team = Team::resume(ctx, workspace.snapshots.clone(), Some(&record.id))
        .await
        .with_context(|| format!("Failed to resume from snapshot {}", record.id.short()))?;
    if let Some(investment) = options.investment {
        team.invest(investment);
    }
    println!(
        "Resumed {} at round {}",
        record.label,
        team.environment().round()
    );

    let summary = team
        .run(config.n_rounds)
        .await
        .context("Team halted after resume")?;
    print_summary(&team, &summary);
    Ok(())
}

/// Summarize a snapshot
async fn cmd_inspect(root: &Path, snapshot: Option<&str>) -> Result<()> {
    let workspace = open_workspace(root)?;
    let record = resolve_snapshot(workspace.snapshots.as_ref(), snapshot).await?;
    let bytes = workspace
        .snapshots
        .load(&record.id)
        .await
        .with_context(|| format!("Failed to load snapshot {}", record.id))?;
    let snapshot = TeamSnapshot::from_bytes(&bytes)?;

    println!("snapshot {}", record.id);
    println!("Label:  {}", record.label);
    println!(
        "Date:   {}",
        record.committed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(project) = &snapshot.project {
        println!("Idea:   {}", project.idea);
    }
    println!("Round:  {}", snapshot.environment.round);
    println!(
        "Budget: spent {:.4} of {:.4}",
        snapshot.budget.spent, snapshot.budget.cap
    );
    println!("Log:    {} message(s)", snapshot.environment.log.len());
    println!();

    for role in &snapshot.environment.roles {
        let progress = role.plan.progress();
        let flag = if role.interrupted { " (interrupted)" } else { "" };
        println!(
            "  {} [{}]{}: {} remembered, {} queued, {}/{} task(s) done",
            role.profile.name,
            role.profile.kind,
            flag,
            role.memory.len(),
            role.inbox.len(),
            progress.finished_tasks,
            progress.total_tasks
        );
    }

    let artifacts = workspace.artifacts.list().await?;
    if !artifacts.is_empty() {
        println!();
        for artifact in artifacts {
            println!(
                "  {} {} ({} bytes)",
                artifact.digest.short(),
                artifact.name,
                artifact.size_bytes
            );
        }
    }
    Ok(())
}

/// Dry-run a proposal against a plan
fn cmd_plan_check(plan_path: &Path, proposal_path: &Path) -> Result<()> {
    let plan_json = std::fs::read_to_string(plan_path)
        .with_context(|| format!("Failed to read plan {:?}", plan_path))?;
    let tasks: Vec<Task> = serde_json::from_str(&plan_json)
        .with_context(|| format!("Plan {:?} is not a task list", plan_path))?;
    let mut plan = Plan::default();
    plan.add_tasks(tasks)
        .with_context(|| format!("Plan {:?} is not well formed", plan_path))?;

    let text = std::fs::read_to_string(proposal_path)
        .with_context(|| format!("Failed to read proposal {:?}", proposal_path))?;
    let proposal = parse_task_proposal(&text).context("Proposal rejected")?;
    let update = plan.precheck(&proposal).context("Proposal rejected")?;
    plan.apply_proposal(proposal)?;

    println!("{}", serde_json::to_string_pretty(&update)?);
    if let Err(e) = plan.validate() {
        println!("warning: resulting plan is incomplete: {}", e);
    }
    println!("{}", serde_json::to_string_pretty(plan.tasks())?);
    Ok(())
}
