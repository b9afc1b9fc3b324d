use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use crate::{Error, RunSummary, SnapshotStore, WorkflowRunState};

/// SQLite-based snapshot store.
///
/// Snapshots are stored as JSON text, one row per `(workflow_name, run_id)`.
pub struct SqliteSnapshotStore {
  pool: SqlitePool,
}

impl SqliteSnapshotStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Open a private in-memory database and run migrations.
  pub async fn in_memory() -> Result<Self, Error> {
    // A single connection, since every sqlite::memory: connection is its own database
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
  async fn load_snapshot(
    &self,
    workflow_name: &str,
    run_id: &str,
  ) -> Result<Option<WorkflowRunState>, Error> {
    let row: Option<(String,)> = sqlx::query_as(
      r#"
            SELECT snapshot
            FROM workflow_snapshots
            WHERE workflow_name = ? AND run_id = ?
            "#,
    )
    .bind(workflow_name)
    .bind(run_id)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some((document,)) => Ok(Some(serde_json::from_str(&document)?)),
      None => Ok(None),
    }
  }

  async fn save_snapshot(
    &self,
    workflow_name: &str,
    run_id: &str,
    state: &WorkflowRunState,
  ) -> Result<(), Error> {
    let document = serde_json::to_string(state)?;
    let updated_at = state.updated_at.unwrap_or_else(Utc::now);

    sqlx::query(
      r#"
            INSERT INTO workflow_snapshots (workflow_name, run_id, snapshot, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (workflow_name, run_id)
            DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at
            "#,
    )
    .bind(workflow_name)
    .bind(run_id)
    .bind(&document)
    .bind(updated_at)
    .execute(&self.pool)
    .await?;

    debug!(workflow = %workflow_name, run_id = %run_id, bytes = document.len(), "snapshot saved");
    Ok(())
  }

  async fn list_runs(&self, workflow_name: &str) -> Result<Vec<RunSummary>, Error> {
    let runs = sqlx::query_as(
      r#"
            SELECT run_id, updated_at
            FROM workflow_snapshots
            WHERE workflow_name = ?
            ORDER BY updated_at DESC
            "#,
    )
    .bind(workflow_name)
    .fetch_all(&self.pool)
    .await?;

    Ok(runs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{StepResult, StepStatus};
  use serde_json::json;

  fn suspended_state(run_id: &str) -> WorkflowRunState {
    let mut state = WorkflowRunState::new(run_id);
    state.value.insert("review".to_string(), StepStatus::Suspended);
    state.context.trigger_data = json!({ "doc": 7 });
    state
      .context
      .steps
      .insert("review".to_string(), StepResult::suspended(json!({ "reason": "approval" })));
    state.refresh(weft_workflow::TRIGGER);
    state
  }

  #[tokio::test]
  async fn test_save_and_load_round_trip() {
    let store = SqliteSnapshotStore::in_memory().await.unwrap();
    let state = suspended_state("run-1");

    store.save_snapshot("wf", "run-1", &state).await.unwrap();
    let loaded = store.load_snapshot("wf", "run-1").await.unwrap();

    assert_eq!(loaded, Some(state));
    assert_eq!(store.load_snapshot("wf", "run-2").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_save_replaces_existing_row() {
    let store = SqliteSnapshotStore::in_memory().await.unwrap();
    let mut state = suspended_state("run-1");
    store.save_snapshot("wf", "run-1", &state).await.unwrap();

    state.value.insert("review".to_string(), StepStatus::Success);
    state.refresh(weft_workflow::TRIGGER);
    store.save_snapshot("wf", "run-1", &state).await.unwrap();

    let loaded = store.load_snapshot("wf", "run-1").await.unwrap().unwrap();
    assert!(loaded.suspended_steps.is_empty());
    assert_eq!(store.list_runs("wf").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_open_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weft.db");

    {
      let store = SqliteSnapshotStore::open(&path).await.unwrap();
      store
        .save_snapshot("wf", "run-1", &suspended_state("run-1"))
        .await
        .unwrap();
    }

    let reopened = SqliteSnapshotStore::open(&path).await.unwrap();
    let runs = reopened.list_runs("wf").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "run-1");
    assert!(reopened.load_snapshot("wf", "run-1").await.unwrap().is_some());
  }
}
