//! Weft Store
//!
//! This crate provides the run-state model (step statuses, machine contexts,
//! `WorkflowRunState` snapshots) and the storage trait used to persist
//! snapshots between process restarts.
//!
//! Snapshots are whole documents keyed by `(workflow name, run id)`. The
//! [`SnapshotStore`] trait defines operations for:
//! - Loading the latest snapshot of a run
//! - Saving (replacing) the snapshot of a run
//! - Listing the runs of a workflow
//!
//! Writers read, merge and write whole documents; there is no optimistic
//! concurrency control, so concurrent writers of one run must be serialized
//! by the caller.

mod memory;
mod sqlite;
mod types;

pub use memory::InMemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;
pub use types::{
  ActivePath, ErrorInfo, MachineContext, StepResult, StepStatus, WorkflowRunState,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A snapshot could not be encoded or decoded.
  #[error("snapshot serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Running migrations failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

/// A stored run, without its snapshot body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunSummary {
  pub run_id: String,
  pub updated_at: DateTime<Utc>,
}

/// Storage trait for workflow run snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
  /// Load the snapshot of a run, if one was saved.
  async fn load_snapshot(
    &self,
    workflow_name: &str,
    run_id: &str,
  ) -> Result<Option<WorkflowRunState>, Error>;

  /// Save the snapshot of a run, replacing any previous one.
  async fn save_snapshot(
    &self,
    workflow_name: &str,
    run_id: &str,
    state: &WorkflowRunState,
  ) -> Result<(), Error>;

  /// List runs of a workflow, most recently updated first.
  async fn list_runs(&self, workflow_name: &str) -> Result<Vec<RunSummary>, Error>;
}
