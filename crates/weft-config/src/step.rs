use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::enums::JoinStrategy;
use crate::reference::Reference;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub step_id: String,
  /// Name of a registered action.
  pub action: String,
  /// Explicit dependencies. When absent, the step depends on every step of
  /// the previous entry in the sequence.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub depends_on: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryConfig>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub variables: BTreeMap<String, Reference>,
  #[serde(default)]
  pub join: JoinStrategy,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

impl StepDef {
  pub fn new(step_id: impl Into<String>, action: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      action: action.into(),
      depends_on: None,
      condition: None,
      retry: None,
      variables: BTreeMap::new(),
      join: JoinStrategy::All,
      timeout_ms: None,
    }
  }

  pub fn depends_on<I, S>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on = Some(ids.into_iter().map(Into::into).collect());
    self
  }

  pub fn when(mut self, condition: Condition) -> Self {
    self.condition = Some(condition);
    self
  }

  pub fn retry(mut self, attempts: u32) -> Self {
    self.retry = Some(RetryConfig {
      attempts,
      delay_ms: None,
    });
    self
  }

  pub fn variable(mut self, name: impl Into<String>, reference: Reference) -> Self {
    self.variables.insert(name.into(), reference);
    self
  }

  pub fn join(mut self, join: JoinStrategy) -> Self {
    self.join = join;
    self
  }

  pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }
}

/// One entry in a step sequence: a single step or a parallel group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepEntry {
  Parallel { parallel: Vec<StepDef> },
  Step(StepDef),
}

impl From<StepDef> for StepEntry {
  fn from(step: StepDef) -> Self {
    StepEntry::Step(step)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
  /// Total number of invocations allowed for the step.
  pub attempts: u32,
  /// Fixed delay between attempts.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delay_ms: Option<u64>,
}
