//! Single-step execution with retries.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, instrument, warn};
use weft_config::RetryConfig;
use weft_workflow::StepNode;

use crate::action::{Action, ActionContext, Outcome};

/// Result of running a step to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRun {
  pub outcome: Outcome,
  /// Number of times the action was invoked.
  pub invocations: u32,
  /// Attempts left when the run ended.
  pub remaining: u32,
}

/// Total invocations allowed for a step: its own retry policy, else the
/// workflow default, else 1. Never below 1.
pub fn attempt_budget(step: &StepNode, default: Option<RetryConfig>) -> u32 {
  step
    .retry
    .or(default)
    .map(|r| r.attempts)
    .unwrap_or(1)
    .max(1)
}

/// Invokes one step's action, retrying failed attempts.
pub struct StepExecutor {
  action: Arc<dyn Action>,
  retry_delay: Option<Duration>,
  timeout: Option<Duration>,
}

impl StepExecutor {
  pub fn new(action: Arc<dyn Action>) -> Self {
    Self {
      action,
      retry_delay: None,
      timeout: None,
    }
  }

  /// Executor configured from a step's retry policy and timeout.
  pub fn for_step(action: Arc<dyn Action>, step: &StepNode, default: Option<RetryConfig>) -> Self {
    Self {
      action,
      retry_delay: step.retry.or(default).and_then(|r| r.delay_ms).map(Duration::from_millis),
      timeout: step.timeout_ms.map(Duration::from_millis),
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Run the action with up to `budget` invocations.
  ///
  /// A failure, timeout or panic consumes one attempt; the action is re-run
  /// while attempts remain. Success and suspension end the run immediately.
  #[instrument(
    name = "step_execute",
    skip(self, input, ctx),
    fields(
      run_id = %ctx.run_id,
      graph_id = %ctx.graph_id,
      step_id = %ctx.step_id,
    )
  )]
  pub async fn run(&self, input: serde_json::Value, ctx: ActionContext, budget: u32) -> StepRun {
    let mut remaining = budget.max(1);
    let mut invocations = 0;

    loop {
      invocations += 1;
      let mut attempt_ctx = ctx.clone();
      attempt_ctx.attempt = invocations;

      match self.invoke(input.clone(), attempt_ctx).await {
        Outcome::Failure(message) => {
          remaining -= 1;
          if remaining == 0 {
            error!(
              step_id = %ctx.step_id,
              attempts = invocations,
              error = %message,
              "step_exhausted"
            );
            return StepRun {
              outcome: Outcome::Failure(message),
              invocations,
              remaining,
            };
          }

          warn!(
            step_id = %ctx.step_id,
            attempt = invocations,
            remaining = remaining,
            error = %message,
            "step_retry"
          );
          if let Some(delay) = self.retry_delay {
            tokio::time::sleep(delay).await;
          }
        }
        outcome => {
          info!(step_id = %ctx.step_id, attempt = invocations, "step_attempt_finished");
          return StepRun {
            outcome,
            invocations,
            remaining,
          };
        }
      }
    }
  }

  async fn invoke(&self, input: serde_json::Value, ctx: ActionContext) -> Outcome {
    let call = AssertUnwindSafe(self.action.execute(input, ctx)).catch_unwind();

    let result = match self.timeout {
      Some(timeout) => match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
          return Outcome::Failure(format!("timed out after {}ms", timeout.as_millis()));
        }
      },
      None => call.await,
    };

    result.unwrap_or_else(|panic| Outcome::Failure(panic_message(panic)))
  }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    format!("action panicked: {}", message)
  } else if let Some(message) = panic.downcast_ref::<String>() {
    format!("action panicked: {}", message)
  } else {
    "action panicked".to_string()
  }
}
