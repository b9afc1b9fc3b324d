//! A state machine executing one step graph.
//!
//! A [`Machine`] owns the context of a single graph (the root graph or one
//! subscriber graph). It schedules ready steps concurrently, records their
//! outcomes, and emits [`ExecutionEvent`]s. Subscriber graphs are never run
//! by the machine itself; it signals them with
//! [`ExecutionEvent::SpawnSubscriber`] and leaves the rest to its owner.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{Instrument, info, instrument, warn};
use weft_config::JoinStrategy;
use weft_store::{MachineContext, StepResult, StepStatus, WorkflowRunState};
use weft_workflow::{StepGraph, StepNode, TRIGGER, Workflow};

use crate::action::{ActionContext, ActionRegistry, Outcome};
use crate::condition::evaluate;
use crate::error::RuntimeError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::input::resolve_input;
use crate::result::{ExecuteOptions, MachineResult};
use crate::step::{StepExecutor, StepRun, attempt_budget};

/// Why a pending step will not run.
#[derive(Debug, Clone, Copy)]
enum SkipReason {
  Dependencies,
  Condition,
}

enum Readiness {
  Blocked,
  Skip(SkipReason),
  Run,
}

/// Executes the steps of a single graph.
pub struct Machine {
  graph_id: String,
  run_id: String,
  workflow: Arc<Workflow>,
  actions: Arc<ActionRegistry>,
  notifier: Arc<dyn ExecutionNotifier>,
  context: MachineContext,
  started: bool,
  /// Step being resumed and the data to hand it.
  resume: Option<(String, serde_json::Value)>,
  /// Steps whose readiness may have changed since the last schedule.
  candidates: Vec<String>,
}

impl Machine {
  /// Create a machine for `graph_id` ([`TRIGGER`] for the root graph).
  pub fn new(
    graph_id: impl Into<String>,
    run_id: impl Into<String>,
    workflow: Arc<Workflow>,
    actions: Arc<ActionRegistry>,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Result<Self, RuntimeError> {
    let graph_id = graph_id.into();
    let graph = workflow
      .graph(&graph_id)
      .ok_or_else(|| RuntimeError::UnknownGraph {
        graph_id: graph_id.clone(),
      })?;
    check_actions(graph, &actions)?;

    Ok(Self {
      graph_id,
      run_id: run_id.into(),
      workflow,
      actions,
      notifier,
      context: MachineContext::default(),
      started: false,
      resume: None,
      candidates: Vec::new(),
    })
  }

  /// Seed the machine's context, as done for subscriber machines.
  pub fn with_context(mut self, context: MachineContext) -> Self {
    self.context = context;
    self
  }

  pub fn graph_id(&self) -> &str {
    &self.graph_id
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn context(&self) -> &MachineContext {
    &self.context
  }

  /// The machine's current state, or `None` before its first execution.
  ///
  /// Only the machine's own graph is described; `child_states` is empty.
  pub fn snapshot(&self) -> Option<WorkflowRunState> {
    if !self.started {
      return None;
    }
    let graph = self.workflow.graph(&self.graph_id)?;

    let mut state = WorkflowRunState::new(self.run_id.clone());
    state.value = graph
      .steps()
      .iter()
      .filter_map(|s| {
        self
          .context
          .status(&s.step_id)
          .map(|status| (s.step_id.clone(), status))
      })
      .collect();
    state.context = self.context.clone();
    state.refresh(&self.graph_id);
    Some(state)
  }

  /// Run the graph until no step can make progress.
  ///
  /// Step failures are recorded in the results, never returned as errors.
  /// Steps behind a suspended step stay `pending`.
  #[instrument(
    name = "machine_execute",
    skip(self, options),
    fields(
      workflow = %self.workflow.name,
      graph_id = %self.graph_id,
      run_id = tracing::field::Empty,
    )
  )]
  pub async fn execute(&mut self, options: ExecuteOptions) -> Result<MachineResult, RuntimeError> {
    let workflow = Arc::clone(&self.workflow);
    let graph = workflow
      .graph(&self.graph_id)
      .ok_or_else(|| RuntimeError::UnknownGraph {
        graph_id: self.graph_id.clone(),
      })?;

    self.restore(graph, options)?;
    self.started = true;
    tracing::Span::current().record("run_id", self.run_id.as_str());
    info!(graph_id = %self.graph_id, run_id = %self.run_id, "machine_started");

    let mut running: JoinSet<(String, StepRun)> = JoinSet::new();
    loop {
      self.schedule(graph, &mut running);

      let Some(joined) = running.join_next().await else {
        break;
      };
      let (step_id, run) = joined.map_err(|e| RuntimeError::Join {
        message: e.to_string(),
      })?;
      self.record(&step_id, run);
    }

    let results: BTreeMap<String, StepResult> = graph
      .steps()
      .iter()
      .map(|s| {
        let result = self
          .context
          .steps
          .get(&s.step_id)
          .cloned()
          .unwrap_or_else(StepResult::pending);
        (s.step_id.clone(), result)
      })
      .collect();

    let count = |status: StepStatus| results.values().filter(|r| r.status == status).count();
    info!(
      graph_id = %self.graph_id,
      run_id = %self.run_id,
      succeeded = count(StepStatus::Success),
      failed = count(StepStatus::Failed),
      skipped = count(StepStatus::Skipped),
      suspended = count(StepStatus::Suspended),
      "machine_completed"
    );

    Ok(MachineResult {
      graph_id: self.graph_id.clone(),
      results,
    })
  }

  /// Prepare the context from a snapshot, a resume request or fresh trigger data.
  fn restore(&mut self, graph: &StepGraph, options: ExecuteOptions) -> Result<(), RuntimeError> {
    let ExecuteOptions {
      trigger_data,
      snapshot,
      step_id,
      resume_data,
    } = options;
    let default_retry = self.workflow.retry;

    match snapshot {
      Some(snapshot) => {
        let own = snapshot
          .find(&self.graph_id)
          .ok_or_else(|| RuntimeError::UnknownGraph {
            graph_id: self.graph_id.clone(),
          })?;
        self.run_id = snapshot.run_id.clone();
        self.context = own.context.clone();

        // Interrupted mid-step
        for step in graph.steps() {
          if let Some(result) = self.context.steps.get_mut(&step.step_id) {
            if result.status == StepStatus::Running {
              *result = StepResult::pending();
            }
          }
        }

        if let Some(step_id) = step_id {
          match snapshot.suspended_steps.get(&step_id) {
            None => return Err(RuntimeError::UnknownSuspendedStep { step_id }),
            Some(owner) if *owner != self.graph_id => {
              return Err(RuntimeError::GraphMismatch {
                step_id,
                expected: owner.clone(),
                actual: self.graph_id.clone(),
              });
            }
            Some(_) => {}
          }

          match self.context.status(&step_id) {
            Some(StepStatus::Suspended) => {}
            other => {
              return Err(RuntimeError::StepNotSuspended {
                step_id,
                status: other.map_or_else(|| "missing".to_string(), |s| s.to_string()),
              });
            }
          }

          let budget = graph
            .get(&step_id)
            .map_or(1, |s| attempt_budget(s, default_retry));
          self.context.steps.insert(step_id.clone(), StepResult::pending());
          self.context.attempts.insert(step_id.clone(), budget);
          info!(step_id = %step_id, graph_id = %self.graph_id, "step_resumed");
          self.resume = Some((step_id, resume_data.unwrap_or(serde_json::Value::Null)));
        }
      }
      None => {
        if let Some(step_id) = step_id {
          return Err(RuntimeError::UnknownSuspendedStep { step_id });
        }
        if let Some(trigger_data) = trigger_data {
          self.context.trigger_data = trigger_data;
        }
      }
    }

    for step in graph.steps() {
      self
        .context
        .steps
        .entry(step.step_id.clone())
        .or_insert_with(StepResult::pending);
      self
        .context
        .attempts
        .entry(step.step_id.clone())
        .or_insert_with(|| attempt_budget(step, default_retry));
    }
    self.candidates = graph.steps().iter().map(|s| s.step_id.clone()).collect();

    Ok(())
  }

  /// Re-check candidate steps: skip ineligible ones and start every ready one.
  ///
  /// Settling a step makes its dependents candidates, so skips cascade until
  /// no candidate is left.
  fn schedule(&mut self, graph: &StepGraph, running: &mut JoinSet<(String, StepRun)>) {
    while !self.candidates.is_empty() {
      let mut seen = HashSet::new();
      let candidates: Vec<String> = std::mem::take(&mut self.candidates)
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect();

      let mut ready = Vec::new();
      for step_id in &candidates {
        let Some(step) = graph.get(step_id) else {
          continue;
        };
        match self.readiness(step) {
          Readiness::Blocked => {}
          Readiness::Skip(reason) => {
            match reason {
              SkipReason::Dependencies => {
                warn!(step_id = %step.step_id, "step_skipped: dependencies not satisfied")
              }
              SkipReason::Condition => info!(step_id = %step.step_id, "step_skipped: condition false"),
            }
            self.transition(&step.step_id, StepResult::skipped());
          }
          Readiness::Run => ready.push(step),
        }
      }

      for step in ready {
        self.start(step, running);
      }
    }
  }

  fn readiness(&self, step: &StepNode) -> Readiness {
    if self.context.status(&step.step_id) != Some(StepStatus::Pending) {
      return Readiness::Blocked;
    }

    let mut statuses = Vec::with_capacity(step.depends_on.len());
    for dependency in &step.depends_on {
      match self.context.status(dependency) {
        Some(status) if status.is_settled() => statuses.push(status),
        _ => return Readiness::Blocked,
      }
    }

    let satisfied = match step.join {
      JoinStrategy::All => statuses.iter().all(|s| *s == StepStatus::Success),
      JoinStrategy::Any => {
        statuses.is_empty() || statuses.iter().any(|s| *s == StepStatus::Success)
      }
    };
    if !satisfied {
      return Readiness::Skip(SkipReason::Dependencies);
    }

    if let Some(condition) = &step.condition {
      if !evaluate(condition, &self.context) {
        return Readiness::Skip(SkipReason::Condition);
      }
    }

    Readiness::Run
  }

  /// Spawn a step, or fail it if its input or action can't be prepared.
  fn start(&mut self, step: &StepNode, running: &mut JoinSet<(String, StepRun)>) {
    let input = match resolve_input(step, &self.entry_input(), &self.context) {
      Ok(input) => input,
      Err(e) => {
        warn!(step_id = %step.step_id, error = %e, "step_input_failed");
        self.transition(&step.step_id, StepResult::failed(e.to_string(), 0));
        return;
      }
    };

    let Some(action) = self.actions.get(&step.action) else {
      let message = format!("unknown action '{}'", step.action);
      self.transition(&step.step_id, StepResult::failed(message, 0));
      return;
    };

    let budget = self
      .context
      .attempts
      .get(&step.step_id)
      .copied()
      .unwrap_or_else(|| attempt_budget(step, self.workflow.retry));

    let resuming = self
      .resume
      .as_ref()
      .is_some_and(|(id, _)| *id == step.step_id);
    let resume_data = if resuming {
      self.resume.take().map(|(_, data)| data)
    } else {
      None
    };

    let ctx = ActionContext::new(
      self.run_id.clone(),
      self.graph_id.clone(),
      step.step_id.clone(),
      self.context.trigger_data.clone(),
      self.context.steps.clone(),
      resume_data,
    );
    let executor = StepExecutor::for_step(action, step, self.workflow.retry);

    self.transition(&step.step_id, StepResult::running());
    info!(step_id = %step.step_id, attempts = budget, "step_started");

    let step_id = step.step_id.clone();
    running.spawn(
      async move {
        let run = executor.run(input, ctx, budget).await;
        (step_id, run)
      }
      .in_current_span(),
    );
  }

  fn record(&mut self, step_id: &str, run: StepRun) {
    self
      .context
      .attempts
      .insert(step_id.to_string(), run.remaining);

    match run.outcome {
      Outcome::Success(output) => {
        info!(step_id = %step_id, invocations = run.invocations, "step_completed");
        self.transition(step_id, StepResult::success(output));
        self.signal_subscriber(step_id);
      }
      Outcome::Failure(message) => {
        self.transition(step_id, StepResult::failed(message, run.invocations));
      }
      Outcome::Suspend(payload) => {
        info!(step_id = %step_id, "step_suspended");
        self.transition(step_id, StepResult::suspended(payload));
      }
    }
  }

  fn transition(&mut self, step_id: &str, result: StepResult) {
    let status = result.status;
    self.context.steps.insert(step_id.to_string(), result);
    if status.is_settled() {
      if let Some(graph) = self.workflow.graph(&self.graph_id) {
        self
          .candidates
          .extend(graph.graph().downstream(step_id).iter().cloned());
      }
    }

    if let Some(state) = self.snapshot() {
      self.notifier.notify(ExecutionEvent::Transition {
        run_id: self.run_id.clone(),
        graph_id: self.graph_id.clone(),
        step_id: step_id.to_string(),
        status,
        state,
      });
    }
  }

  fn signal_subscriber(&self, step_id: &str) {
    let Some(subscriber) = self.workflow.subscriber(step_id) else {
      return;
    };
    if let Some(when) = &subscriber.when {
      if !evaluate(when, &self.context) {
        info!(parent_step_id = %step_id, "subscriber_not_selected");
        return;
      }
    }

    self.notifier.notify(ExecutionEvent::SpawnSubscriber {
      run_id: self.run_id.clone(),
      graph_id: self.graph_id.clone(),
      parent_step_id: step_id.to_string(),
      context: self.child_context(),
    });
  }

  /// Context handed to a subscriber: successful steps and the trigger data.
  fn child_context(&self) -> MachineContext {
    MachineContext {
      steps: self
        .context
        .steps
        .iter()
        .filter(|(_, r)| r.status == StepStatus::Success)
        .map(|(id, r)| (id.clone(), r.clone()))
        .collect(),
      trigger_data: self.context.trigger_data.clone(),
      attempts: BTreeMap::new(),
    }
  }

  /// Input for steps without dependencies.
  fn entry_input(&self) -> serde_json::Value {
    if self.graph_id == TRIGGER {
      self.context.trigger_data.clone()
    } else {
      self
        .context
        .output(&self.graph_id)
        .cloned()
        .unwrap_or(serde_json::Value::Null)
    }
  }
}

/// Check every step of a graph names a registered action.
pub(crate) fn check_actions(graph: &StepGraph, actions: &ActionRegistry) -> Result<(), RuntimeError> {
  for step in graph.steps() {
    if !actions.contains(&step.action) {
      return Err(RuntimeError::UnknownAction {
        step_id: step.step_id.clone(),
        action: step.action.clone(),
      });
    }
  }
  Ok(())
}
