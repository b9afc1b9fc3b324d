use serde::{Deserialize, Serialize};

/// How a step treats the settled statuses of its dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
  /// Every dependency must have succeeded.
  #[default]
  All,
  /// At least one dependency must have succeeded; skipped or failed
  /// dependencies are tolerated.
  Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
  Eq,
  Ne,
  Gt,
  Gte,
  Lt,
  Lte,
}
