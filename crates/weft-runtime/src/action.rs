//! The action contract.
//!
//! Actions are the units of work a step invokes. They receive the step's
//! resolved input and an [`ActionContext`], and report an [`Outcome`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use weft_store::StepResult;

/// What an action invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Success(serde_json::Value),
  /// A failed attempt. Retried while the step has attempts left.
  Failure(String),
  /// Pause the step until it is resumed with external data.
  Suspend(serde_json::Value),
}

impl<E: fmt::Display> From<Result<serde_json::Value, E>> for Outcome {
  fn from(result: Result<serde_json::Value, E>) -> Self {
    match result {
      Ok(output) => Outcome::Success(output),
      Err(e) => Outcome::Failure(e.to_string()),
    }
  }
}

/// What an action can see of the run.
#[derive(Debug, Clone)]
pub struct ActionContext {
  pub run_id: String,
  /// Id of the graph the step belongs to.
  pub graph_id: String,
  pub step_id: String,
  /// 1-based invocation number within this execution.
  pub attempt: u32,
  trigger_data: serde_json::Value,
  steps: BTreeMap<String, StepResult>,
  resume_data: Option<serde_json::Value>,
}

impl ActionContext {
  pub(crate) fn new(
    run_id: String,
    graph_id: String,
    step_id: String,
    trigger_data: serde_json::Value,
    steps: BTreeMap<String, StepResult>,
    resume_data: Option<serde_json::Value>,
  ) -> Self {
    Self {
      run_id,
      graph_id,
      step_id,
      attempt: 1,
      trigger_data,
      steps,
      resume_data,
    }
  }

  pub fn trigger_data(&self) -> &serde_json::Value {
    &self.trigger_data
  }

  /// Result of a prior step visible to this machine.
  pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
    self.steps.get(step_id)
  }

  /// Output of a prior step, if it succeeded.
  pub fn step_output(&self, step_id: &str) -> Option<&serde_json::Value> {
    self.steps.get(step_id).and_then(|r| r.output.as_ref())
  }

  /// Whether this invocation resumes a suspended step.
  pub fn is_resumed(&self) -> bool {
    self.resume_data.is_some()
  }

  pub fn resume_data(&self) -> Option<&serde_json::Value> {
    self.resume_data.as_ref()
  }

  /// Suspend the step, recording `payload` for whoever resumes it.
  pub fn suspend(&self, payload: serde_json::Value) -> Outcome {
    Outcome::Suspend(payload)
  }
}

/// A unit of work invoked by steps.
///
/// Invocations are at-least-once per attempt; actions with side effects must
/// be idempotent.
#[async_trait]
pub trait Action: Send + Sync {
  async fn execute(&self, input: serde_json::Value, ctx: ActionContext) -> Outcome;
}

/// An [`Action`] backed by an async closure.
pub struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
  F: Fn(serde_json::Value, ActionContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Outcome> + Send + 'static,
{
  async fn execute(&self, input: serde_json::Value, ctx: ActionContext) -> Outcome {
    (self.0)(input, ctx).await
  }
}

/// Wrap an async closure as an action.
///
/// ```ignore
/// let double = action_fn(|input, _ctx| async move {
///   Outcome::Success(json!(input.as_i64().unwrap_or(0) * 2))
/// });
/// ```
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn Action>
where
  F: Fn(serde_json::Value, ActionContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Outcome> + Send + 'static,
{
  Arc::new(FnAction(f))
}

/// Actions available to a workflow, keyed by name.
#[derive(Clone, Default)]
pub struct ActionRegistry {
  actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an action, replacing any previous one with the same name.
  pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
    self.actions.insert(name.into(), action);
  }

  pub fn with(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
    self.register(name, action);
    self
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
    self.actions.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.actions.contains_key(name)
  }
}

impl fmt::Debug for ActionRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<&String> = self.actions.keys().collect();
    names.sort();
    f.debug_struct("ActionRegistry")
      .field("actions", &names)
      .finish()
  }
}
