//! Runtime error types.

use weft_workflow::WorkflowError;

/// Errors surfaced by the runtime's public API.
///
/// Step failures are never reported here; they are recorded in the step's
/// [`weft_store::StepResult`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The workflow definition is invalid.
  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  /// A step names an action that is not registered.
  #[error("step '{step_id}' uses unknown action '{action}'")]
  UnknownAction { step_id: String, action: String },

  /// A graph id does not belong to the workflow or the snapshot.
  #[error("unknown graph: {graph_id}")]
  UnknownGraph { graph_id: String },

  /// The snapshot does not record the step as suspended.
  #[error("step '{step_id}' is not suspended in the snapshot")]
  UnknownSuspendedStep { step_id: String },

  /// The step to resume is suspended in a different graph than the machine's.
  #[error("step '{step_id}' belongs to graph '{expected}', not '{actual}'")]
  GraphMismatch {
    step_id: String,
    expected: String,
    actual: String,
  },

  /// The step is not in the `suspended` state.
  #[error("step '{step_id}' is {status}, not suspended")]
  StepNotSuspended { step_id: String, status: String },

  /// A step's input could not be resolved.
  #[error("input resolution failed for step '{step_id}': {message}")]
  InputResolution { step_id: String, message: String },

  /// Persistence was requested but no store is configured.
  #[error("no snapshot store configured")]
  StoreNotConfigured,

  /// Snapshot storage failed.
  #[error("snapshot store error: {0}")]
  Store(#[from] weft_store::Error),

  /// A spawned task could not be joined.
  #[error("task join error: {message}")]
  Join { message: String },
}
