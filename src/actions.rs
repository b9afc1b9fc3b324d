//! Built-in actions available to workflows run from the command line.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use weft_runtime::{Action, ActionRegistry, Outcome, action_fn};

/// Registry with every built-in action.
pub fn builtin() -> ActionRegistry {
  ActionRegistry::new()
    .with("echo", echo())
    .with("fail", fail())
    .with("approval", approval())
    .with("sleep", sleep())
}

/// Succeeds with its input.
fn echo() -> Arc<dyn Action> {
  action_fn(|input, _ctx| async move { Outcome::Success(input) })
}

/// Fails with `input.message`, or a generic message.
fn fail() -> Arc<dyn Action> {
  action_fn(|input, ctx| async move {
    let message = input
      .get("message")
      .and_then(|m| m.as_str())
      .map(str::to_string)
      .unwrap_or_else(|| format!("step '{}' failed", ctx.step_id));
    Outcome::Failure(message)
  })
}

/// Suspends until resumed, then succeeds with the resume data.
fn approval() -> Arc<dyn Action> {
  action_fn(|input, ctx| async move {
    match ctx.resume_data() {
      Some(decision) => Outcome::Success(json!({ "input": input, "decision": decision })),
      None => ctx.suspend(json!({ "step_id": ctx.step_id.clone(), "input": input })),
    }
  })
}

/// Waits `input.ms` milliseconds, then succeeds with its input.
fn sleep() -> Arc<dyn Action> {
  action_fn(|input, _ctx| async move {
    let ms = input.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Outcome::Success(input)
  })
}
