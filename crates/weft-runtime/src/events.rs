//! Execution events and notifiers for observability.
//!
//! Machines emit events as their steps change state. The workflow instance
//! consumes them to start subscriber machines and to keep its in-memory
//! snapshot table current; user notifiers receive the same stream.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use weft_store::{MachineContext, StepStatus, WorkflowRunState};

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A step changed status.
  Transition {
    run_id: String,
    graph_id: String,
    step_id: String,
    status: StepStatus,
    /// The emitting machine's snapshot after the change.
    state: WorkflowRunState,
  },

  /// A step with a subscriber succeeded and the subscriber's condition held.
  SpawnSubscriber {
    run_id: String,
    /// Graph of the machine that emitted the event.
    graph_id: String,
    parent_step_id: String,
    /// Seed context for the subscriber machine.
    context: MachineContext,
  },
}

/// Trait for receiving execution events.
///
/// Events from one machine arrive in the order its steps changed state; there
/// is no ordering across machines.
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so that a slow consumer never blocks a machine.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
