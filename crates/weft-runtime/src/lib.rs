//! Weft Runtime
//!
//! This crate executes locked workflows. The layers, bottom up:
//!
//! - [`StepExecutor`] invokes a step's [`Action`] with retries, timeouts and
//!   panic isolation.
//! - [`Machine`] runs one step graph: it schedules ready steps concurrently,
//!   skips ineligible ones, and emits [`ExecutionEvent`]s.
//! - [`WorkflowInstance`] runs the root machine and every subscriber machine
//!   spawned along the way, composes their snapshots, and persists them
//!   through a [`weft_store::SnapshotStore`].

mod action;
mod condition;
mod error;
mod events;
mod input;
mod instance;
mod machine;
mod result;
mod step;

pub use action::{Action, ActionContext, ActionRegistry, FnAction, Outcome, action_fn};
pub use condition::evaluate;
pub use error::RuntimeError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use input::resolve_input;
pub use instance::{FinishCallback, WorkflowInstance};
pub use machine::Machine;
pub use result::{ExecuteOptions, ExecuteResult, MachineResult};
pub use step::{StepExecutor, StepRun, attempt_budget};
