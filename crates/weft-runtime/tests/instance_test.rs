//! Integration tests for workflow instances: subscriber machines, snapshots
//! and persistence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::Notify;
use weft_config::{Condition, StepDef, SubscriberDef, WorkflowDef};
use weft_runtime::{
  Action, ActionRegistry, ChannelNotifier, ExecuteOptions, ExecutionEvent, Outcome, RuntimeError,
  WorkflowInstance, action_fn,
};
use weft_store::{InMemorySnapshotStore, SnapshotStore, SqliteSnapshotStore, StepStatus};
use weft_workflow::{TRIGGER, Workflow};

fn counted(calls: Arc<AtomicU32>) -> Arc<dyn Action> {
  action_fn(move |input, _ctx| {
    let calls = calls.clone();
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Outcome::Success(input)
    }
  })
}

fn approval() -> Arc<dyn Action> {
  action_fn(|_input, ctx| async move {
    match ctx.resume_data() {
      Some(data) => Outcome::Success(json!({ "approved_by": data })),
      None => ctx.suspend(json!({ "waiting_on": ctx.step_id.clone() })),
    }
  })
}

fn registry(calls: &Arc<AtomicU32>) -> Arc<ActionRegistry> {
  Arc::new(
    ActionRegistry::new()
      .with("echo", counted(calls.clone()))
      .with("approval", approval()),
  )
}

fn instance(def: WorkflowDef, calls: &Arc<AtomicU32>) -> WorkflowInstance {
  let workflow = Workflow::lock(def).expect("workflow should lock");
  WorkflowInstance::new(Arc::new(workflow), registry(calls)).expect("instance should build")
}

#[tokio::test]
async fn test_subscriber_results_are_merged() {
  let calls = Arc::new(AtomicU32::new(0));
  let def = WorkflowDef::new("fanout")
    .step(StepDef::new("a", "echo"))
    .step(StepDef::new("b", "echo"))
    .subscriber(
      SubscriberDef::new("a")
        .step(StepDef::new("d", "echo"))
        .step(StepDef::new("e", "echo")),
    );
  let instance = instance(def, &calls).with_run_id("run-fanout");

  let result = instance.start(json!({ "id": 9 })).await.unwrap();

  assert_eq!(result.run_id, "run-fanout");
  let ids: Vec<&str> = result.results.keys().map(String::as_str).collect();
  assert_eq!(ids, vec!["a", "b", "d", "e"]);
  for id in ids {
    assert_eq!(result.status(id), Some(StepStatus::Success));
  }
  // Subscriber entry steps receive the parent step's output
  assert_eq!(result.output("d"), Some(&json!({ "id": 9 })));
  assert_eq!(calls.load(Ordering::SeqCst), 4);

  let state = instance.get_state().await.unwrap().unwrap();
  assert_eq!(state.run_id, "run-fanout");
  assert_eq!(state.value.len(), 2);
  assert_eq!(state.child_states["a"].value["e"], StepStatus::Success);
}

#[tokio::test]
async fn test_nested_subscribers_at_depth() {
  let calls = Arc::new(AtomicU32::new(0));
  let def = WorkflowDef::new("nested")
    .step(StepDef::new("a", "echo"))
    .subscriber(SubscriberDef::new("a").step(StepDef::new("d", "echo")))
    .subscriber(SubscriberDef::new("d").step(StepDef::new("e", "echo")))
    .subscriber(SubscriberDef::new("e").step(StepDef::new("f", "echo")));
  let instance = instance(def, &calls);

  let result = instance.start(json!("deep")).await.unwrap();

  assert_eq!(result.results.len(), 4);
  assert_eq!(result.output("f"), Some(&json!("deep")));

  let state = instance.get_state().await.unwrap().unwrap();
  let e = &state.child_states["a"].child_states["d"].child_states["e"];
  assert_eq!(e.value["f"], StepStatus::Success);
  assert_eq!(state.parent_of("e"), Some("d".to_string()));
}

#[tokio::test]
async fn test_subscriber_condition_selects_machines() {
  let calls = Arc::new(AtomicU32::new(0));
  let def = WorkflowDef::new("selective")
    .step(StepDef::new("a", "echo"))
    .subscriber(
      SubscriberDef::new("a")
        .when(Condition::eq("trigger_data.notify", json!(true)))
        .step(StepDef::new("d", "echo")),
    );
  let instance = instance(def, &calls);

  let result = instance.start(json!({ "notify": false })).await.unwrap();
  assert_eq!(result.results.len(), 1);
  assert!(!result.results.contains_key("d"));

  let result = instance.start(json!({ "notify": true })).await.unwrap();
  assert_eq!(result.status("d"), Some(StepStatus::Success));
}

#[tokio::test]
async fn test_each_start_is_a_new_run() {
  let calls = Arc::new(AtomicU32::new(0));
  let store = Arc::new(InMemorySnapshotStore::new());
  let def = WorkflowDef::new("rerun")
    .step(StepDef::new("a", "echo"))
    .subscriber(
      SubscriberDef::new("a")
        .when(Condition::eq("trigger_data.notify", json!(true)))
        .step(StepDef::new("d", "echo")),
    );
  let instance = instance(def, &calls).with_store(store.clone());

  let first = instance.start(json!({ "notify": true })).await.unwrap();
  let persisted = instance.persist_workflow_snapshot().await.unwrap();
  assert_eq!(persisted.child_states.len(), 1);

  let second = instance.start(json!({ "notify": false })).await.unwrap();
  assert_ne!(first.run_id, second.run_id);
  assert_eq!(instance.run_id(), second.run_id);

  // The first run's subscriber machine is not part of the second run
  let state = instance.get_state().await.unwrap().unwrap();
  assert!(state.child_states.is_empty());
  let persisted = instance.persist_workflow_snapshot().await.unwrap();
  assert_eq!(persisted.run_id, second.run_id);
  assert!(persisted.child_states.is_empty());
  assert_eq!(persisted.context.trigger_data, json!({ "notify": false }));

  // The first run is still stored on its own
  let stored = store
    .load_snapshot("rerun", &first.run_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(stored.child_states["a"].value["d"], StepStatus::Success);
  assert_eq!(store.list_runs("rerun").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_suspend_persist_resume() {
  let calls = Arc::new(AtomicU32::new(0));
  let store = Arc::new(InMemorySnapshotStore::new());
  let def = || {
    WorkflowDef::new("review")
      .step(StepDef::new("a", "echo"))
      .step(StepDef::new("b", "approval"))
      .step(StepDef::new("c", "echo"))
  };

  let first = instance(def(), &calls).with_store(store.clone());
  let result = first.start(json!({ "doc": 1 })).await.unwrap();
  assert_eq!(result.status("b"), Some(StepStatus::Suspended));
  assert_eq!(result.status("c"), Some(StepStatus::Pending));
  assert_eq!(result.suspended().collect::<Vec<_>>(), vec!["b"]);

  let persisted = first.persist_workflow_snapshot().await.unwrap();
  assert!(persisted.updated_at.is_some());
  assert_eq!(persisted.suspended_steps.get("b"), Some(&TRIGGER.to_string()));

  // A new process loads the snapshot and resumes the suspended step
  let snapshot = store
    .load_snapshot("review", &result.run_id)
    .await
    .unwrap()
    .unwrap();
  let second = instance(def(), &calls).with_store(store.clone());
  let resumed = second
    .execute(ExecuteOptions::resume(snapshot, "b", json!("alice")))
    .await
    .unwrap();

  assert_eq!(resumed.run_id, result.run_id);
  assert_eq!(resumed.status("b"), Some(StepStatus::Success));
  assert_eq!(resumed.output("b"), Some(&json!({ "approved_by": "alice" })));
  assert_eq!(resumed.status("c"), Some(StepStatus::Success));
  // a ran once, c once
  assert_eq!(calls.load(Ordering::SeqCst), 2);

  let state = second.persist_workflow_snapshot().await.unwrap();
  assert!(state.suspended_steps.is_empty());
  assert_eq!(state.value["c"], StepStatus::Success);
}

#[tokio::test]
async fn test_resume_reenters_only_owning_subscriber_graph() {
  let calls = Arc::new(AtomicU32::new(0));
  let store = Arc::new(InMemorySnapshotStore::new());
  let def = WorkflowDef::new("sub-review")
    .step(StepDef::new("a", "echo"))
    .step(StepDef::new("b", "echo"))
    .subscriber(
      SubscriberDef::new("a")
        .step(StepDef::new("d", "approval"))
        .step(StepDef::new("e", "echo")),
    );
  let instance = instance(def, &calls).with_store(store.clone());

  let result = instance.start(json!({})).await.unwrap();
  assert_eq!(result.status("d"), Some(StepStatus::Suspended));
  assert_eq!(result.status("e"), Some(StepStatus::Pending));
  assert_eq!(calls.load(Ordering::SeqCst), 2);

  let snapshot = instance.persist_workflow_snapshot().await.unwrap();
  assert_eq!(snapshot.suspended_steps.get("d"), Some(&"a".to_string()));

  let resumed = instance
    .execute(ExecuteOptions::resume(snapshot, "d", json!("bob")))
    .await
    .unwrap();

  // Only the subscriber graph ran again
  let ids: Vec<&str> = resumed.results.keys().map(String::as_str).collect();
  assert_eq!(ids, vec!["d", "e"]);
  assert_eq!(resumed.status("e"), Some(StepStatus::Success));
  assert_eq!(calls.load(Ordering::SeqCst), 3);

  // The root graph is still described by the merged state
  let state = instance.get_state().await.unwrap().unwrap();
  assert_eq!(state.value["a"], StepStatus::Success);
  assert_eq!(state.value["b"], StepStatus::Success);
  assert_eq!(state.child_states["a"].value["d"], StepStatus::Success);
  assert!(state.suspended_steps.is_empty());
  assert!(state.active_paths.is_empty());
}

#[tokio::test]
async fn test_restore_snapshot_resumes_every_machine() {
  let calls = Arc::new(AtomicU32::new(0));
  let def = WorkflowDef::new("restore")
    .step(StepDef::new("a", "echo"))
    .step(StepDef::new("b", "echo"))
    .subscriber(SubscriberDef::new("a").step(StepDef::new("d", "echo")));
  let instance = instance(def, &calls);

  instance.start(json!(1)).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 3);

  // Pretend the process died while b and d were running
  let mut snapshot = instance.get_state().await.unwrap().unwrap();
  snapshot.value.insert("b".to_string(), StepStatus::Running);
  snapshot.context.steps.get_mut("b").unwrap().status = StepStatus::Running;
  let child = snapshot.child_states.get_mut("a").unwrap();
  child.value.insert("d".to_string(), StepStatus::Running);
  child.context.steps.get_mut("d").unwrap().status = StepStatus::Running;

  let result = instance
    .execute(ExecuteOptions::restore(snapshot))
    .await
    .unwrap();

  assert_eq!(calls.load(Ordering::SeqCst), 5);
  assert_eq!(result.results.len(), 3);
  assert_eq!(result.status("b"), Some(StepStatus::Success));
  assert_eq!(result.status("d"), Some(StepStatus::Success));
}

#[tokio::test]
async fn test_get_state_while_executing() {
  let started = Arc::new(Notify::new());
  let release = Arc::new(Notify::new());
  let gate = {
    let started = started.clone();
    let release = release.clone();
    action_fn(move |input, _ctx| {
      let started = started.clone();
      let release = release.clone();
      async move {
        started.notify_one();
        release.notified().await;
        Outcome::Success(input)
      }
    })
  };

  let def = WorkflowDef::new("slow").step(StepDef::new("slow", "gate"));
  let workflow = Arc::new(Workflow::lock(def).unwrap());
  let actions = Arc::new(ActionRegistry::new().with("gate", gate));
  let instance = WorkflowInstance::new(workflow, actions).unwrap();

  assert!(instance.get_state().await.unwrap().is_none());

  let observe = async {
    started.notified().await;
    let state = instance.get_state().await.unwrap().unwrap();
    release.notify_one();
    state
  };
  let (result, state) = tokio::join!(instance.start(json!(null)), observe);

  assert_eq!(state.value["slow"], StepStatus::Running);
  assert_eq!(state.active_paths.len(), 1);
  assert_eq!(result.unwrap().status("slow"), Some(StepStatus::Success));
}

#[tokio::test]
async fn test_persist_to_sqlite_round_trip() {
  let calls = Arc::new(AtomicU32::new(0));
  let store = Arc::new(SqliteSnapshotStore::in_memory().await.unwrap());
  let def = WorkflowDef::new("durable")
    .step(StepDef::new("a", "echo"))
    .step(StepDef::new("b", "approval"))
    .subscriber(SubscriberDef::new("a").step(StepDef::new("d", "echo")));
  let instance = instance(def, &calls).with_store(store.clone());

  let result = instance.start(json!({ "k": "v" })).await.unwrap();
  let saved = instance.persist_workflow_snapshot().await.unwrap();

  let loaded = store
    .load_snapshot("durable", &result.run_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(loaded, saved);
  assert_eq!(loaded.context.trigger_data, json!({ "k": "v" }));
  assert_eq!(loaded.child_states["a"].value["d"], StepStatus::Success);

  let runs = store.list_runs("durable").await.unwrap();
  assert_eq!(runs.len(), 1);
  assert_eq!(runs[0].run_id, result.run_id);
}

#[tokio::test]
async fn test_start_invokes_finish_callback_and_notifier() {
  let calls = Arc::new(AtomicU32::new(0));
  let finished = Arc::new(Mutex::new(None));
  let (notifier, mut events) = ChannelNotifier::channel();
  let def = WorkflowDef::new("callbacks")
    .step(StepDef::new("a", "echo"))
    .subscriber(SubscriberDef::new("a").step(StepDef::new("d", "echo")));

  let instance = {
    let finished = finished.clone();
    instance(def, &calls)
      .with_notifier(Arc::new(notifier))
      .on_finish(move |result| {
        *finished.lock().unwrap() = Some(result.run_id.clone());
      })
  };

  let result = instance.start(json!({})).await.unwrap();
  assert_eq!(finished.lock().unwrap().as_deref(), Some(result.run_id.as_str()));

  let mut spawned = Vec::new();
  let mut transitions = 0;
  while let Ok(event) = events.try_recv() {
    match event {
      ExecutionEvent::SpawnSubscriber { parent_step_id, .. } => spawned.push(parent_step_id),
      ExecutionEvent::Transition { .. } => transitions += 1,
    }
  }
  assert_eq!(spawned, vec!["a".to_string()]);
  assert_eq!(transitions, 4);
}

#[tokio::test]
async fn test_configuration_and_resume_errors() {
  let calls = Arc::new(AtomicU32::new(0));
  let def = WorkflowDef::new("errors")
    .step(StepDef::new("a", "echo"))
    .subscriber(SubscriberDef::new("a").step(StepDef::new("d", "missing")));
  let workflow = Arc::new(Workflow::lock(def).unwrap());
  let err = WorkflowInstance::new(workflow, registry(&calls)).unwrap_err();
  assert!(
    matches!(err, RuntimeError::UnknownAction { step_id, action } if step_id == "d" && action == "missing")
  );

  let instance = instance(WorkflowDef::new("ok").step(StepDef::new("a", "echo")), &calls);
  assert!(matches!(
    instance.persist_workflow_snapshot().await,
    Err(RuntimeError::StoreNotConfigured)
  ));

  instance.start(json!({})).await.unwrap();
  let snapshot = instance.get_state().await.unwrap().unwrap();
  let err = instance
    .execute(ExecuteOptions::resume(snapshot, "a", json!(null)))
    .await
    .unwrap_err();
  assert!(matches!(err, RuntimeError::UnknownSuspendedStep { step_id } if step_id == "a"));
}
