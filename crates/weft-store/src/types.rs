use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_workflow::TRIGGER;

/// Status of a single step within one machine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Success,
  Failed,
  Suspended,
  Skipped,
}

impl StepStatus {
  /// Settled steps unblock their dependents.
  pub fn is_settled(self) -> bool {
    matches!(self, Self::Success | Self::Failed | Self::Skipped)
  }

  /// Terminal for the current execution. Suspended steps are terminal but not
  /// settled: their dependents wait for a resume.
  pub fn is_terminal(self) -> bool {
    self.is_settled() || self == Self::Suspended
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Success => "success",
      Self::Failed => "failed",
      Self::Suspended => "suspended",
      Self::Skipped => "skipped",
    }
  }
}

impl fmt::Display for StepStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
  pub message: String,
  /// Number of invocations made before giving up.
  pub attempts: u32,
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
  pub status: StepStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorInfo>,
  /// Payload the action attached when it suspended.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub suspend_payload: Option<serde_json::Value>,
}

impl StepResult {
  fn with_status(status: StepStatus) -> Self {
    Self {
      status,
      output: None,
      error: None,
      suspend_payload: None,
    }
  }

  pub fn pending() -> Self {
    Self::with_status(StepStatus::Pending)
  }

  pub fn running() -> Self {
    Self::with_status(StepStatus::Running)
  }

  pub fn skipped() -> Self {
    Self::with_status(StepStatus::Skipped)
  }

  pub fn success(output: serde_json::Value) -> Self {
    Self {
      output: Some(output),
      ..Self::with_status(StepStatus::Success)
    }
  }

  pub fn failed(message: impl Into<String>, attempts: u32) -> Self {
    Self {
      error: Some(ErrorInfo {
        message: message.into(),
        attempts,
      }),
      ..Self::with_status(StepStatus::Failed)
    }
  }

  pub fn suspended(payload: serde_json::Value) -> Self {
    Self {
      suspend_payload: Some(payload),
      ..Self::with_status(StepStatus::Suspended)
    }
  }
}

/// Everything one machine knows about its run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineContext {
  #[serde(default)]
  pub steps: BTreeMap<String, StepResult>,
  #[serde(default)]
  pub trigger_data: serde_json::Value,
  /// Remaining invocations per step.
  #[serde(default)]
  pub attempts: BTreeMap<String, u32>,
}

impl MachineContext {
  pub fn new(trigger_data: serde_json::Value) -> Self {
    Self {
      trigger_data,
      ..Default::default()
    }
  }

  pub fn status(&self, step_id: &str) -> Option<StepStatus> {
    self.steps.get(step_id).map(|r| r.status)
  }

  pub fn output(&self, step_id: &str) -> Option<&serde_json::Value> {
    self.steps.get(step_id).and_then(|r| r.output.as_ref())
  }
}

/// A step that is mid-execution somewhere in the run tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePath {
  pub graph_id: String,
  pub step_id: String,
  pub status: StepStatus,
}

/// Serializable state of a run.
///
/// The root state describes the root graph; nested machines live in
/// `child_states`, keyed by the id of the step that spawned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunState {
  pub run_id: String,
  /// Status of each step owned by this graph.
  #[serde(default)]
  pub value: BTreeMap<String, StepStatus>,
  #[serde(default)]
  pub context: MachineContext,
  /// Derived: running and suspended steps in this subtree.
  #[serde(default)]
  pub active_paths: Vec<ActivePath>,
  /// Suspended step id -> id of the graph to resume into.
  #[serde(default)]
  pub suspended_steps: BTreeMap<String, String>,
  #[serde(default)]
  pub child_states: BTreeMap<String, WorkflowRunState>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowRunState {
  pub fn new(run_id: impl Into<String>) -> Self {
    Self {
      run_id: run_id.into(),
      ..Default::default()
    }
  }

  /// Find the state of a graph in this tree ([`TRIGGER`] is the root).
  pub fn find(&self, graph_id: &str) -> Option<&WorkflowRunState> {
    if graph_id == TRIGGER {
      return Some(self);
    }
    self.find_child(graph_id)
  }

  fn find_child(&self, graph_id: &str) -> Option<&WorkflowRunState> {
    if let Some(child) = self.child_states.get(graph_id) {
      return Some(child);
    }
    self
      .child_states
      .values()
      .find_map(|child| child.find_child(graph_id))
  }

  fn find_child_mut(&mut self, graph_id: &str) -> Option<&mut WorkflowRunState> {
    if self.child_states.contains_key(graph_id) {
      return self.child_states.get_mut(graph_id);
    }
    self
      .child_states
      .values_mut()
      .find_map(|child| child.find_child_mut(graph_id))
  }

  /// Id of the graph whose state holds `graph_id` as a direct child.
  pub fn parent_of(&self, graph_id: &str) -> Option<String> {
    fn walk(state: &WorkflowRunState, own_id: &str, target: &str) -> Option<String> {
      if state.child_states.contains_key(target) {
        return Some(own_id.to_string());
      }
      state
        .child_states
        .iter()
        .find_map(|(id, child)| walk(child, id, target))
    }
    walk(self, TRIGGER, graph_id)
  }

  /// Graph ids in this tree, parents before children.
  pub fn graph_ids(&self) -> Vec<String> {
    fn walk(state: &WorkflowRunState, out: &mut Vec<String>) {
      for (id, child) in &state.child_states {
        out.push(id.clone());
        walk(child, out);
      }
    }
    let mut ids = vec![TRIGGER.to_string()];
    walk(self, &mut ids);
    ids
  }

  /// Lay a machine's state over this tree.
  ///
  /// The root (`graph_id == TRIGGER`) replaces this state's own fields. A
  /// nested state replaces the existing node for `graph_id`, keeping its
  /// children, or is attached under `parent_id` (the root when the parent is
  /// unknown).
  pub fn overlay(&mut self, graph_id: &str, parent_id: &str, state: WorkflowRunState) {
    if graph_id == TRIGGER {
      self.replace_with(state);
      return;
    }
    if let Some(existing) = self.find_child_mut(graph_id) {
      existing.replace_with(state);
      return;
    }
    if parent_id != TRIGGER {
      if let Some(parent) = self.find_child_mut(parent_id) {
        parent.child_states.insert(graph_id.to_string(), state);
        return;
      }
    }
    self.child_states.insert(graph_id.to_string(), state);
  }

  fn replace_with(&mut self, state: WorkflowRunState) {
    self.run_id = state.run_id;
    self.value = state.value;
    self.context = state.context;
    self.child_states.extend(state.child_states);
  }

  /// Recompute `suspended_steps` and `active_paths` for this subtree.
  pub fn refresh(&mut self, graph_id: &str) {
    let mut suspended = BTreeMap::new();
    let mut active = Vec::new();

    for (step_id, status) in &self.value {
      match status {
        StepStatus::Suspended => {
          suspended.insert(step_id.clone(), graph_id.to_string());
        }
        StepStatus::Running => {}
        _ => continue,
      }
      active.push(ActivePath {
        graph_id: graph_id.to_string(),
        step_id: step_id.clone(),
        status: *status,
      });
    }

    for (child_id, child) in self.child_states.iter_mut() {
      child.refresh(child_id);
      suspended.extend(
        child
          .suspended_steps
          .iter()
          .map(|(k, v)| (k.clone(), v.clone())),
      );
      active.extend(child.active_paths.iter().cloned());
    }

    self.suspended_steps = suspended;
    self.active_paths = active;
  }
}
