use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{Error, RunSummary, SnapshotStore, WorkflowRunState};

/// In-memory snapshot store.
///
/// Snapshots are kept as JSON documents so that every save and load goes
/// through the same serialization as a durable backend. Suitable for tests
/// and single-process use.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
  data: RwLock<HashMap<(String, String), (String, DateTime<Utc>)>>,
}

impl InMemorySnapshotStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
  async fn load_snapshot(
    &self,
    workflow_name: &str,
    run_id: &str,
  ) -> Result<Option<WorkflowRunState>, Error> {
    let data = self.data.read().await;
    match data.get(&(workflow_name.to_string(), run_id.to_string())) {
      Some((document, _)) => Ok(Some(serde_json::from_str(document)?)),
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
    self.data.write().await.insert(
      (workflow_name.to_string(), run_id.to_string()),
      (document, updated_at),
    );
    Ok(())
  }

  async fn list_runs(&self, workflow_name: &str) -> Result<Vec<RunSummary>, Error> {
    let data = self.data.read().await;
    let mut runs: Vec<RunSummary> = data
      .iter()
      .filter(|((name, _), _)| name == workflow_name)
      .map(|((_, run_id), (_, updated_at))| RunSummary {
        run_id: run_id.clone(),
        updated_at: *updated_at,
      })
      .collect();
    runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(runs)
  }
}
