//! Workflow instance.
//!
//! A [`WorkflowInstance`] runs a whole workflow: the root machine plus every
//! subscriber machine spawned along the way, at any depth. It keeps the
//! latest snapshot of each machine in memory and composes them into a single
//! [`WorkflowRunState`] tree for inspection and persistence.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, instrument};
use weft_store::{SnapshotStore, StepResult, WorkflowRunState};
use weft_workflow::{TRIGGER, Workflow};

use crate::action::ActionRegistry;
use crate::error::RuntimeError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::machine::{Machine, check_actions};
use crate::result::{ExecuteOptions, ExecuteResult, MachineResult};

/// Callback invoked after [`WorkflowInstance::start`] completes.
pub type FinishCallback = Arc<dyn Fn(&ExecuteResult) + Send + Sync>;

/// In-memory machine snapshots of the current execution.
#[derive(Debug, Default)]
struct StateTable {
  /// Snapshot the execution was restored from.
  base: Option<WorkflowRunState>,
  /// A fresh run owns its whole tree; stored documents are never merged in.
  fresh: bool,
  /// Graph id -> id of the graph that spawned it, in registration order.
  parents: Vec<(String, String)>,
  states: BTreeMap<String, WorkflowRunState>,
}

impl StateTable {
  fn reset(&mut self, base: Option<WorkflowRunState>) {
    self.fresh = base.is_none();
    self.base = base;
    self.parents.clear();
    self.states.clear();
  }

  fn register(&mut self, graph_id: &str, parent_id: &str) {
    if !self.parents.iter().any(|(id, _)| id == graph_id) {
      self
        .parents
        .push((graph_id.to_string(), parent_id.to_string()));
    }
  }

  /// Lay every machine snapshot over `base`, parents before children.
  fn compose(&self, base: Option<WorkflowRunState>, run_id: &str) -> Option<WorkflowRunState> {
    let base = if self.fresh {
      None
    } else {
      base.or_else(|| self.base.clone())
    };
    if base.is_none() && self.states.is_empty() {
      return None;
    }

    let mut tree = base.unwrap_or_else(|| WorkflowRunState::new(run_id));
    tree.run_id = run_id.to_string();
    for (graph_id, parent_id) in &self.parents {
      if let Some(state) = self.states.get(graph_id) {
        tree.overlay(graph_id, parent_id, state.clone());
      }
    }
    tree.refresh(TRIGGER);
    Some(tree)
  }
}

/// Records machine snapshots and forwards events to the instance loop and
/// the user's notifier.
struct InstanceNotifier {
  table: Arc<Mutex<StateTable>>,
  sender: mpsc::UnboundedSender<ExecutionEvent>,
  inner: Arc<dyn ExecutionNotifier>,
}

impl ExecutionNotifier for InstanceNotifier {
  fn notify(&self, event: ExecutionEvent) {
    if let ExecutionEvent::Transition {
      graph_id, state, ..
    } = &event
    {
      lock(&self.table).states.insert(graph_id.clone(), state.clone());
    }
    self.inner.notify(event.clone());
    // Ignore send errors - the execution may already have returned
    let _ = self.sender.send(event);
  }
}

fn lock(table: &Mutex<StateTable>) -> MutexGuard<'_, StateTable> {
  table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run id of the instance. A fresh run takes the id if no run has used it
/// yet, otherwise it gets a new one.
#[derive(Debug)]
struct RunId {
  id: String,
  used: bool,
}

impl RunId {
  fn new(id: String) -> Self {
    Self { id, used: false }
  }

  fn for_fresh_run(&mut self) -> String {
    if self.used {
      self.id = uuid::Uuid::new_v4().to_string();
    }
    self.used = true;
    self.id.clone()
  }

  fn adopt(&mut self, id: &str) -> String {
    self.id = id.to_string();
    self.used = true;
    self.id.clone()
  }
}

/// A running (or resumable) workflow.
///
/// The instance is shared by reference: [`get_state`](Self::get_state) and
/// [`persist_workflow_snapshot`](Self::persist_workflow_snapshot) may be
/// called while [`execute`](Self::execute) is in flight.
pub struct WorkflowInstance {
  workflow: Arc<Workflow>,
  actions: Arc<ActionRegistry>,
  store: Option<Arc<dyn SnapshotStore>>,
  notifier: Arc<dyn ExecutionNotifier>,
  on_finish: Option<FinishCallback>,
  run_id: Mutex<RunId>,
  table: Arc<Mutex<StateTable>>,
}

impl WorkflowInstance {
  /// Create an instance, checking every step's action is registered.
  pub fn new(workflow: Arc<Workflow>, actions: Arc<ActionRegistry>) -> Result<Self, RuntimeError> {
    for graph in workflow.graphs() {
      check_actions(graph, &actions)?;
    }

    Ok(Self {
      workflow,
      actions,
      store: None,
      notifier: Arc::new(NoopNotifier),
      on_finish: None,
      run_id: Mutex::new(RunId::new(uuid::Uuid::new_v4().to_string())),
      table: Arc::new(Mutex::new(StateTable::default())),
    })
  }

  pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Use `run_id` for the next fresh run instead of a generated one.
  pub fn with_run_id(self, run_id: impl Into<String>) -> Self {
    *self.run_id.lock().unwrap_or_else(PoisonError::into_inner) = RunId::new(run_id.into());
    self
  }

  /// Register a callback invoked when [`start`](Self::start) finishes.
  pub fn on_finish(mut self, callback: impl Fn(&ExecuteResult) + Send + Sync + 'static) -> Self {
    self.on_finish = Some(Arc::new(callback));
    self
  }

  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  /// Id of the current (or next) run.
  pub fn run_id(&self) -> String {
    self
      .run_id
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .id
      .clone()
  }

  /// Start a fresh run and invoke the completion callback.
  pub async fn start(&self, trigger_data: serde_json::Value) -> Result<ExecuteResult, RuntimeError> {
    let result = self.execute(ExecuteOptions::trigger(trigger_data)).await?;
    if let Some(callback) = &self.on_finish {
      callback(&result);
    }
    Ok(result)
  }

  /// Execute the workflow.
  ///
  /// - Without a snapshot, the root machine starts with the trigger data
  ///   under a new run id.
  /// - With a snapshot and `step_id`, only the graph owning that suspended
  ///   step is resumed.
  /// - With a snapshot alone, every machine recorded in it is resumed.
  ///
  /// Subscriber machines spawned at any depth run concurrently and are all
  /// joined before returning. Results are merged by step id.
  #[instrument(
    name = "workflow_execute",
    skip(self, options),
    fields(workflow = %self.workflow.name, run_id = tracing::field::Empty)
  )]
  pub async fn execute(&self, options: ExecuteOptions) -> Result<ExecuteResult, RuntimeError> {
    let snapshot = options.snapshot.clone().map(|mut snapshot| {
      snapshot.refresh(TRIGGER);
      snapshot
    });

    let run_id = {
      let mut current = self.run_id.lock().unwrap_or_else(PoisonError::into_inner);
      match &snapshot {
        Some(snapshot) => current.adopt(&snapshot.run_id),
        None => current.for_fresh_run(),
      }
    };
    tracing::Span::current().record("run_id", run_id.as_str());
    info!(workflow = %self.workflow.name, run_id = %run_id, "workflow_started");

    lock(&self.table).reset(snapshot.clone());

    let (sender, mut events) = mpsc::unbounded_channel();
    let notifier: Arc<dyn ExecutionNotifier> = Arc::new(InstanceNotifier {
      table: Arc::clone(&self.table),
      sender,
      inner: Arc::clone(&self.notifier),
    });

    let mut machines: JoinSet<Result<MachineResult, RuntimeError>> = JoinSet::new();
    for (graph_id, parent_id, machine_options) in self.entry_machines(options, snapshot)? {
      let machine = self.machine(&graph_id, &run_id, &notifier)?;
      lock(&self.table).register(&graph_id, &parent_id);
      spawn_machine(&mut machines, machine, machine_options);
    }

    let mut results: BTreeMap<String, StepResult> = BTreeMap::new();
    let outcome = loop {
      // Machines emit before they finish, so an empty set means no spawns are in flight
      while let Ok(event) = events.try_recv() {
        self.handle_event(event, &run_id, &notifier, &mut machines)?;
      }
      if machines.is_empty() {
        break Ok(());
      }

      tokio::select! {
        biased;
        Some(event) = events.recv() => {
          self.handle_event(event, &run_id, &notifier, &mut machines)?;
        }
        Some(joined) = machines.join_next() => {
          match joined {
            Ok(Ok(machine_result)) => results.extend(machine_result.results),
            Ok(Err(e)) => break Err(e),
            Err(e) => break Err(RuntimeError::Join { message: e.to_string() }),
          }
        }
      }
    };

    match outcome {
      Ok(()) => {
        info!(run_id = %run_id, steps = results.len(), "workflow_completed");
        Ok(ExecuteResult { run_id, results })
      }
      Err(e) => {
        error!(run_id = %run_id, error = %e, "workflow_failed");
        Err(e)
      }
    }
  }

  /// Current state of the run: the stored snapshot (if any) overlaid with the
  /// in-memory machine snapshots.
  pub async fn get_state(&self) -> Result<Option<WorkflowRunState>, RuntimeError> {
    let run_id = self.run_id();
    let stored = match &self.store {
      Some(store) => store.load_snapshot(&self.workflow.name, &run_id).await?,
      None => None,
    };
    Ok(lock(&self.table).compose(stored, &run_id))
  }

  /// Merge the in-memory state onto the stored snapshot and save it.
  pub async fn persist_workflow_snapshot(&self) -> Result<WorkflowRunState, RuntimeError> {
    let store = self.store.as_ref().ok_or(RuntimeError::StoreNotConfigured)?;
    let run_id = self.run_id();

    let previous = store.load_snapshot(&self.workflow.name, &run_id).await?;
    let mut state = lock(&self.table)
      .compose(previous, &run_id)
      .unwrap_or_else(|| WorkflowRunState::new(run_id.clone()));
    state.updated_at = Some(Utc::now());

    store
      .save_snapshot(&self.workflow.name, &run_id, &state)
      .await?;
    info!(
      run_id = %run_id,
      suspended = state.suspended_steps.len(),
      "snapshot_persisted"
    );
    Ok(state)
  }

  /// Machines to start for an execution: `(graph id, parent graph id, options)`.
  fn entry_machines(
    &self,
    options: ExecuteOptions,
    snapshot: Option<WorkflowRunState>,
  ) -> Result<Vec<(String, String, ExecuteOptions)>, RuntimeError> {
    let Some(snapshot) = snapshot else {
      if let Some(step_id) = &options.step_id {
        return Err(RuntimeError::UnknownSuspendedStep {
          step_id: step_id.clone(),
        });
      }
      return Ok(vec![(TRIGGER.to_string(), TRIGGER.to_string(), options)]);
    };

    let parent_of = |graph_id: &str| {
      snapshot
        .parent_of(graph_id)
        .unwrap_or_else(|| TRIGGER.to_string())
    };

    match options.step_id.clone() {
      Some(step_id) => {
        let graph_id = snapshot
          .suspended_steps
          .get(&step_id)
          .cloned()
          .ok_or(RuntimeError::UnknownSuspendedStep { step_id })?;
        let parent_id = parent_of(&graph_id);
        Ok(vec![(
          graph_id,
          parent_id,
          ExecuteOptions {
            snapshot: Some(snapshot.clone()),
            ..options
          },
        )])
      }
      None => snapshot
        .graph_ids()
        .into_iter()
        .map(|graph_id| {
          if self.workflow.graph(&graph_id).is_none() {
            return Err(RuntimeError::UnknownGraph { graph_id });
          }
          let parent_id = parent_of(&graph_id);
          Ok((graph_id, parent_id, ExecuteOptions::restore(snapshot.clone())))
        })
        .collect(),
    }
  }

  fn machine(
    &self,
    graph_id: &str,
    run_id: &str,
    notifier: &Arc<dyn ExecutionNotifier>,
  ) -> Result<Machine, RuntimeError> {
    Machine::new(
      graph_id,
      run_id,
      Arc::clone(&self.workflow),
      Arc::clone(&self.actions),
      Arc::clone(notifier),
    )
  }

  fn handle_event(
    &self,
    event: ExecutionEvent,
    run_id: &str,
    notifier: &Arc<dyn ExecutionNotifier>,
    machines: &mut JoinSet<Result<MachineResult, RuntimeError>>,
  ) -> Result<(), RuntimeError> {
    let ExecutionEvent::SpawnSubscriber {
      graph_id,
      parent_step_id,
      context,
      ..
    } = event
    else {
      return Ok(());
    };

    info!(
      run_id = %run_id,
      parent_step_id = %parent_step_id,
      spawned_by = %graph_id,
      "subscriber_spawned"
    );
    let machine = self
      .machine(&parent_step_id, run_id, notifier)?
      .with_context(context);
    lock(&self.table).register(&parent_step_id, &graph_id);
    spawn_machine(machines, machine, ExecuteOptions::default());
    Ok(())
  }
}

impl fmt::Debug for WorkflowInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkflowInstance")
      .field("workflow", &self.workflow.name)
      .field("run_id", &self.run_id())
      .field("actions", &self.actions)
      .field("store", &self.store.is_some())
      .finish()
  }
}

fn spawn_machine(
  machines: &mut JoinSet<Result<MachineResult, RuntimeError>>,
  mut machine: Machine,
  options: ExecuteOptions,
) {
  machines.spawn(async move { machine.execute(options).await }.in_current_span());
}
