//! Condition evaluation.
//!
//! Conditions are evaluated against a JSON view of the machine context:
//! `{ "steps": { <id>: { "status", "output" } }, "trigger_data" }`. Evaluation
//! never fails; a path that does not resolve makes its predicate false.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use weft_config::{CompareOp, Condition};
use weft_store::MachineContext;

/// Evaluate a condition against a machine context.
pub fn evaluate(condition: &Condition, context: &MachineContext) -> bool {
  evaluate_view(condition, &context_view(context))
}

/// The JSON document conditions and paths are resolved against.
pub(crate) fn context_view(context: &MachineContext) -> Value {
  let steps: Map<String, Value> = context
    .steps
    .iter()
    .map(|(id, result)| {
      let mut entry = Map::new();
      entry.insert(
        "status".to_string(),
        Value::String(result.status.as_str().to_string()),
      );
      if let Some(output) = &result.output {
        entry.insert("output".to_string(), output.clone());
      }
      (id.clone(), Value::Object(entry))
    })
    .collect();

  let mut view = Map::new();
  view.insert("steps".to_string(), Value::Object(steps));
  view.insert("trigger_data".to_string(), context.trigger_data.clone());
  Value::Object(view)
}

fn evaluate_view(condition: &Condition, view: &Value) -> bool {
  match condition {
    Condition::Compare { path, op, value } => match lookup(view, path) {
      Some(actual) => compare(actual, *op, value),
      None => false,
    },
    Condition::Exists { path } => lookup(view, path).is_some_and(|v| !v.is_null()),
    Condition::And(conditions) => conditions.iter().all(|c| evaluate_view(c, view)),
    Condition::Or(conditions) => conditions.iter().any(|c| evaluate_view(c, view)),
    Condition::Not(inner) => !evaluate_view(inner, view),
  }
}

/// Resolve a dotted path. An empty path selects the value itself; numeric
/// segments index into arrays.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
  if path.is_empty() {
    return Some(value);
  }
  path.split('.').try_fold(value, |current, segment| match current {
    Value::Object(map) => map.get(segment),
    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
  match op {
    CompareOp::Eq => values_equal(actual, expected),
    CompareOp::Ne => !values_equal(actual, expected),
    CompareOp::Gt => ordering(actual, expected) == Some(Ordering::Greater),
    CompareOp::Gte => matches!(
      ordering(actual, expected),
      Some(Ordering::Greater | Ordering::Equal)
    ),
    CompareOp::Lt => ordering(actual, expected) == Some(Ordering::Less),
    CompareOp::Lte => matches!(
      ordering(actual, expected),
      Some(Ordering::Less | Ordering::Equal)
    ),
  }
}

fn values_equal(a: &Value, b: &Value) -> bool {
  // 1 and 1.0 are equal
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    _ => None,
  }
}
