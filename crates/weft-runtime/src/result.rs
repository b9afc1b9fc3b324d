//! Execution option and result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use weft_store::{StepResult, StepStatus, WorkflowRunState};

/// How to start or continue an execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
  /// Trigger data for a fresh run.
  pub trigger_data: Option<serde_json::Value>,
  /// Snapshot to restore from.
  pub snapshot: Option<WorkflowRunState>,
  /// Suspended step to resume (requires `snapshot`).
  pub step_id: Option<String>,
  /// Data handed to the resumed step.
  pub resume_data: Option<serde_json::Value>,
}

impl ExecuteOptions {
  /// A fresh run.
  pub fn trigger(trigger_data: serde_json::Value) -> Self {
    Self {
      trigger_data: Some(trigger_data),
      ..Default::default()
    }
  }

  /// Continue every machine recorded in a snapshot.
  pub fn restore(snapshot: WorkflowRunState) -> Self {
    Self {
      snapshot: Some(snapshot),
      ..Default::default()
    }
  }

  /// Resume one suspended step of a snapshot.
  pub fn resume(
    snapshot: WorkflowRunState,
    step_id: impl Into<String>,
    resume_data: serde_json::Value,
  ) -> Self {
    Self {
      snapshot: Some(snapshot),
      step_id: Some(step_id.into()),
      resume_data: Some(resume_data),
      ..Default::default()
    }
  }
}

/// Results of one machine's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineResult {
  pub graph_id: String,
  /// Every step of the machine's graph.
  pub results: BTreeMap<String, StepResult>,
}

impl MachineResult {
  pub fn status(&self, step_id: &str) -> Option<StepStatus> {
    self.results.get(step_id).map(|r| r.status)
  }
}

/// Results of a workflow execution, merged across machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
  pub run_id: String,
  pub results: BTreeMap<String, StepResult>,
}

impl ExecuteResult {
  pub fn status(&self, step_id: &str) -> Option<StepStatus> {
    self.results.get(step_id).map(|r| r.status)
  }

  pub fn output(&self, step_id: &str) -> Option<&serde_json::Value> {
    self.results.get(step_id).and_then(|r| r.output.as_ref())
  }

  /// Steps waiting for a resume.
  pub fn suspended(&self) -> impl Iterator<Item = &str> {
    self
      .results
      .iter()
      .filter(|(_, r)| r.status == StepStatus::Suspended)
      .map(|(id, _)| id.as_str())
  }
}
