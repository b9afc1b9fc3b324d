mod actions;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use weft_config::WorkflowDef;
use weft_runtime::{ExecuteOptions, ExecuteResult, WorkflowInstance};
use weft_store::{SnapshotStore, SqliteSnapshotStore};
use weft_workflow::Workflow;

/// Weft - a durable workflow engine with suspendable steps
#[derive(Parser)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.weft)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Start a new run; the trigger payload is read from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Run id to use instead of a generated one
    #[arg(long)]
    run_id: Option<String>,
  },

  /// Resume a suspended step; the resume data is read from stdin
  Resume {
    workflow_file: PathBuf,

    #[arg(long)]
    run_id: String,

    /// The suspended step to resume
    #[arg(long)]
    step: String,
  },

  /// Continue every machine of an interrupted run
  Recover {
    workflow_file: PathBuf,

    #[arg(long)]
    run_id: String,
  },

  /// Print the stored state of a run
  State {
    workflow_file: PathBuf,

    #[arg(long)]
    run_id: String,
  },

  /// List stored runs of a workflow
  Runs { workflow_file: PathBuf },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
    )
    .with_writer(io::stderr)
    .with_target(false)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".weft"),
  };

  let Some(command) = cli.command else {
    println!("weft - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { dispatch(command, data_dir).await })
}

async fn dispatch(command: Commands, data_dir: PathBuf) -> Result<()> {
  match command {
    Commands::Run {
      workflow_file,
      run_id,
    } => run_workflow(&workflow_file, &data_dir, run_id).await,
    Commands::Resume {
      workflow_file,
      run_id,
      step,
    } => resume_step(&workflow_file, &data_dir, run_id, step).await,
    Commands::Recover {
      workflow_file,
      run_id,
    } => recover_run(&workflow_file, &data_dir, run_id).await,
    Commands::State {
      workflow_file,
      run_id,
    } => print_state(&workflow_file, &data_dir, run_id).await,
    Commands::Runs { workflow_file } => list_runs(&workflow_file, &data_dir).await,
  }
}

async fn run_workflow(workflow_file: &Path, data_dir: &Path, run_id: Option<String>) -> Result<()> {
  let (workflow, store) = load(workflow_file, data_dir).await?;

  let payload = read_payload_from_stdin()?;
  eprintln!("Payload: {}", payload);

  let mut instance = new_instance(workflow, store)?;
  if let Some(run_id) = run_id {
    instance = instance.with_run_id(run_id);
  }

  let result = instance
    .start(payload)
    .await
    .context("workflow execution failed")?;
  finish(&instance, result).await
}

async fn resume_step(workflow_file: &Path, data_dir: &Path, run_id: String, step: String) -> Result<()> {
  let (workflow, store) = load(workflow_file, data_dir).await?;
  let snapshot = stored_snapshot(store.as_ref(), &workflow.name, &run_id).await?;

  let resume_data = read_payload_from_stdin()?;
  let instance = new_instance(workflow, store)?;
  let result = instance
    .execute(ExecuteOptions::resume(snapshot, step.clone(), resume_data))
    .await
    .with_context(|| format!("failed to resume step '{}'", step))?;
  finish(&instance, result).await
}

async fn recover_run(workflow_file: &Path, data_dir: &Path, run_id: String) -> Result<()> {
  let (workflow, store) = load(workflow_file, data_dir).await?;
  let snapshot = stored_snapshot(store.as_ref(), &workflow.name, &run_id).await?;

  let instance = new_instance(workflow, store)?;
  let result = instance
    .execute(ExecuteOptions::restore(snapshot))
    .await
    .context("failed to recover run")?;
  finish(&instance, result).await
}

async fn print_state(workflow_file: &Path, data_dir: &Path, run_id: String) -> Result<()> {
  let (workflow, store) = load(workflow_file, data_dir).await?;
  let state = stored_snapshot(store.as_ref(), &workflow.name, &run_id).await?;
  println!("{}", serde_json::to_string_pretty(&state)?);
  Ok(())
}

async fn list_runs(workflow_file: &Path, data_dir: &Path) -> Result<()> {
  let (workflow, store) = load(workflow_file, data_dir).await?;
  let runs = store
    .list_runs(&workflow.name)
    .await
    .context("failed to list runs")?;
  println!("{}", serde_json::to_string_pretty(&runs)?);
  Ok(())
}

/// Read and lock a workflow, and open the snapshot store.
async fn load(workflow_file: &Path, data_dir: &Path) -> Result<(Workflow, Arc<SqliteSnapshotStore>)> {
  let workflow_content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  let workflow_def: WorkflowDef = serde_json::from_str(&workflow_content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let workflow = Workflow::lock(workflow_def)
    .with_context(|| format!("invalid workflow: {}", workflow_file.display()))?;
  info!(workflow = %workflow.name, steps = workflow.graphs().map(|g| g.len()).sum::<usize>(), "workflow_loaded");

  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let store = SqliteSnapshotStore::open(data_dir.join("weft.db"))
    .await
    .context("failed to open snapshot store")?;

  Ok((workflow, Arc::new(store)))
}

fn new_instance(workflow: Workflow, store: Arc<SqliteSnapshotStore>) -> Result<WorkflowInstance> {
  let instance = WorkflowInstance::new(Arc::new(workflow), Arc::new(actions::builtin()))
    .context("failed to create workflow instance")?
    .with_store(store);
  Ok(instance)
}

async fn stored_snapshot(
  store: &SqliteSnapshotStore,
  workflow_name: &str,
  run_id: &str,
) -> Result<weft_store::WorkflowRunState> {
  match store
    .load_snapshot(workflow_name, run_id)
    .await
    .context("failed to load snapshot")?
  {
    Some(snapshot) => Ok(snapshot),
    None => bail!("no stored run '{}' for workflow '{}'", run_id, workflow_name),
  }
}

/// Persist the run and print its results.
async fn finish(instance: &WorkflowInstance, result: ExecuteResult) -> Result<()> {
  let state = instance
    .persist_workflow_snapshot()
    .await
    .context("failed to persist snapshot")?;

  eprintln!("Run: {}", result.run_id);
  for step_id in state.suspended_steps.keys() {
    eprintln!(
      "Suspended: {} (resume with `weft resume <workflow> --run-id {} --step {}`)",
      step_id, result.run_id, step_id
    );
  }

  println!("{}", serde_json::to_string_pretty(&result)?);
  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
