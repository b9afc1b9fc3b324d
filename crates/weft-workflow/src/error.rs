use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
  #[error("duplicate step id: {step_id}")]
  DuplicateStepId { step_id: String },

  #[error("step id '{step_id}' is reserved")]
  ReservedStepId { step_id: String },

  #[error("step '{step_id}' depends on unknown step '{dependency}'")]
  UnknownDependency { step_id: String, dependency: String },

  #[error("cycle detected in graph '{graph_id}' at step '{step_id}'")]
  CycleDetected { graph_id: String, step_id: String },

  #[error("graph '{graph_id}' has no steps")]
  EmptyGraph { graph_id: String },

  #[error("subscriber parent step not found: {parent_step_id}")]
  UnknownSubscriberParent { parent_step_id: String },

  #[error("more than one subscriber registered on step '{parent_step_id}'")]
  DuplicateSubscriber { parent_step_id: String },

  #[error("subscriber on step '{parent_step_id}' is not reachable from the root graph")]
  UnreachableSubscriber { parent_step_id: String },
}
