use serde::{Deserialize, Serialize};

use crate::enums::CompareOp;

/// A structural predicate over the run context.
///
/// Paths are dotted lookups rooted at `{ steps: { <id>: { status, output } }, trigger_data }`,
/// e.g. `steps.fetch.output.count` or `trigger_data.user.role`.
///
/// ```json
/// { "and": [
///   { "compare": { "path": "steps.fetch.status", "op": "eq", "value": "success" } },
///   { "not": { "exists": { "path": "trigger_data.dry_run" } } }
/// ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
  Compare {
    path: String,
    op: CompareOp,
    value: serde_json::Value,
  },
  Exists {
    path: String,
  },
  And(Vec<Condition>),
  Or(Vec<Condition>),
  Not(Box<Condition>),
}

impl Condition {
  /// Shorthand for an equality comparison.
  pub fn eq(path: impl Into<String>, value: serde_json::Value) -> Self {
    Condition::Compare {
      path: path.into(),
      op: CompareOp::Eq,
      value,
    }
  }

  /// Shorthand for an existence check.
  pub fn exists(path: impl Into<String>) -> Self {
    Condition::Exists { path: path.into() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_deserialize_nested_condition() {
    let condition: Condition = serde_json::from_value(json!({
      "and": [
        { "compare": { "path": "trigger_data.x", "op": "gte", "value": 1 } },
        { "not": { "exists": { "path": "steps.a.output.error" } } }
      ]
    }))
    .unwrap();

    assert_eq!(
      condition,
      Condition::And(vec![
        Condition::Compare {
          path: "trigger_data.x".to_string(),
          op: CompareOp::Gte,
          value: json!(1),
        },
        Condition::Not(Box::new(Condition::exists("steps.a.output.error"))),
      ])
    );
  }
}
