use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::step::{RetryConfig, StepEntry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub name: String,
  /// Retry policy for steps that don't declare their own.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryConfig>,
  pub steps: Vec<StepEntry>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub subscribers: Vec<SubscriberDef>,
}

impl WorkflowDef {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      retry: None,
      steps: Vec::new(),
      subscribers: Vec::new(),
    }
  }

  pub fn step(mut self, step: impl Into<StepEntry>) -> Self {
    self.steps.push(step.into());
    self
  }

  pub fn subscriber(mut self, subscriber: SubscriberDef) -> Self {
    self.subscribers.push(subscriber);
    self
  }
}

/// A step graph started whenever `parent_step_id` succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberDef {
  pub parent_step_id: String,
  /// Evaluated against the parent machine's context when the parent succeeds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub when: Option<Condition>,
  pub steps: Vec<StepEntry>,
}

impl SubscriberDef {
  pub fn new(parent_step_id: impl Into<String>) -> Self {
    Self {
      parent_step_id: parent_step_id.into(),
      when: None,
      steps: Vec::new(),
    }
  }

  pub fn when(mut self, condition: Condition) -> Self {
    self.when = Some(condition);
    self
  }

  pub fn step(mut self, step: impl Into<StepEntry>) -> Self {
    self.steps.push(step.into());
    self
  }
}
