use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use weft_config::{Condition, JoinStrategy, Reference, RetryConfig, StepDef};

use crate::graph::Graph;

/// A locked step with explicit dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
  pub step_id: String,
  pub action: String,
  pub depends_on: Vec<String>,
  pub condition: Option<Condition>,
  pub retry: Option<RetryConfig>,
  pub variables: BTreeMap<String, Reference>,
  pub join: JoinStrategy,
  pub timeout_ms: Option<u64>,
}

impl StepNode {
  pub fn new(step_id: impl Into<String>, action: impl Into<String>, depends_on: Vec<String>) -> Self {
    Self {
      step_id: step_id.into(),
      action: action.into(),
      depends_on,
      condition: None,
      retry: None,
      variables: BTreeMap::new(),
      join: JoinStrategy::All,
      timeout_ms: None,
    }
  }

  pub(crate) fn from_def(def: StepDef, depends_on: Vec<String>) -> Self {
    Self {
      step_id: def.step_id,
      action: def.action,
      depends_on,
      condition: def.condition,
      retry: def.retry,
      variables: def.variables,
      join: def.join,
      timeout_ms: def.timeout_ms,
    }
  }
}

/// An immutable DAG of steps.
///
/// The root graph's id is [`crate::TRIGGER`]; a subscriber graph's id is the
/// id of the step it is attached to.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGraph {
  graph_id: String,
  steps: Vec<StepNode>,
  index: HashMap<String, usize>,
  graph: Graph,
}

impl StepGraph {
  pub(crate) fn new(graph_id: String, steps: Vec<StepNode>) -> Self {
    let index = steps
      .iter()
      .enumerate()
      .map(|(i, s)| (s.step_id.clone(), i))
      .collect();
    let graph = Graph::new(&steps);
    Self {
      graph_id,
      steps,
      index,
      graph,
    }
  }

  pub fn graph_id(&self) -> &str {
    &self.graph_id
  }

  /// Steps in declaration order.
  pub fn steps(&self) -> &[StepNode] {
    &self.steps
  }

  pub fn get(&self, step_id: &str) -> Option<&StepNode> {
    self.index.get(step_id).map(|&i| &self.steps[i])
  }

  pub fn contains(&self, step_id: &str) -> bool {
    self.index.contains_key(step_id)
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}
