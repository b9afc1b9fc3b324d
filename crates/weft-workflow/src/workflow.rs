use std::collections::{HashMap, HashSet, VecDeque};

use weft_config::{Condition, RetryConfig, StepEntry, WorkflowDef};

use crate::error::WorkflowError;
use crate::step::{StepGraph, StepNode};

/// Id of the root graph and of the virtual node every root entry step hangs off.
pub const TRIGGER: &str = "trigger";

/// A step graph started whenever its parent step succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
  pub parent_step_id: String,
  pub when: Option<Condition>,
  pub graph: StepGraph,
}

/// A locked workflow ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
  pub name: String,
  /// Default retry policy for steps without their own.
  pub retry: Option<RetryConfig>,
  root: StepGraph,
  subscribers: HashMap<String, Subscriber>,
}

impl Workflow {
  /// Validate a definition and lock it.
  ///
  /// This process:
  /// 1. Flattens sequences and parallel groups into explicit dependencies
  /// 2. Checks step ids are unique across every graph
  /// 3. Checks dependencies stay inside their graph and form no cycle
  /// 4. Checks every subscriber hangs off a step reachable from the root
  pub fn lock(def: WorkflowDef) -> Result<Self, WorkflowError> {
    let root = StepGraph::new(TRIGGER.to_string(), flatten(def.steps));

    let mut subscribers = HashMap::new();
    for sub in def.subscribers {
      let parent_step_id = sub.parent_step_id;
      if subscribers.contains_key(&parent_step_id) {
        return Err(WorkflowError::DuplicateSubscriber { parent_step_id });
      }
      let graph = StepGraph::new(parent_step_id.clone(), flatten(sub.steps));
      subscribers.insert(
        parent_step_id.clone(),
        Subscriber {
          parent_step_id,
          when: sub.when,
          graph,
        },
      );
    }

    let workflow = Self {
      name: def.name,
      retry: def.retry,
      root,
      subscribers,
    };
    workflow.validate()?;
    Ok(workflow)
  }

  /// The root graph.
  pub fn root(&self) -> &StepGraph {
    &self.root
  }

  /// Look up a graph by id ([`TRIGGER`] or a subscriber's parent step id).
  pub fn graph(&self, graph_id: &str) -> Option<&StepGraph> {
    if graph_id == TRIGGER {
      Some(&self.root)
    } else {
      self.subscribers.get(graph_id).map(|s| &s.graph)
    }
  }

  /// The subscriber registered on a step, if any.
  pub fn subscriber(&self, parent_step_id: &str) -> Option<&Subscriber> {
    self.subscribers.get(parent_step_id)
  }

  pub fn subscribers(&self) -> impl Iterator<Item = &Subscriber> {
    self.subscribers.values()
  }

  /// The root graph followed by every subscriber graph.
  pub fn graphs(&self) -> impl Iterator<Item = &StepGraph> {
    std::iter::once(&self.root).chain(self.subscribers.values().map(|s| &s.graph))
  }

  /// Id of the graph that owns a step.
  pub fn graph_of(&self, step_id: &str) -> Option<&str> {
    self
      .graphs()
      .find(|g| g.contains(step_id))
      .map(|g| g.graph_id())
  }

  fn validate(&self) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();

    for graph in self.graphs() {
      if graph.is_empty() {
        return Err(WorkflowError::EmptyGraph {
          graph_id: graph.graph_id().to_string(),
        });
      }

      for step in graph.steps() {
        if step.step_id == TRIGGER {
          return Err(WorkflowError::ReservedStepId {
            step_id: step.step_id.clone(),
          });
        }
        if !seen.insert(step.step_id.as_str()) {
          return Err(WorkflowError::DuplicateStepId {
            step_id: step.step_id.clone(),
          });
        }
        for dependency in &step.depends_on {
          if !graph.contains(dependency) {
            return Err(WorkflowError::UnknownDependency {
              step_id: step.step_id.clone(),
              dependency: dependency.clone(),
            });
          }
        }
      }

      if let Some(step_id) = graph.graph().find_cycle() {
        return Err(WorkflowError::CycleDetected {
          graph_id: graph.graph_id().to_string(),
          step_id,
        });
      }
    }

    for parent in self.subscribers.keys() {
      if !seen.contains(parent.as_str()) {
        return Err(WorkflowError::UnknownSubscriberParent {
          parent_step_id: parent.clone(),
        });
      }
    }

    // Walk from the root through subscriber parents
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&StepGraph> = VecDeque::from([&self.root]);
    while let Some(graph) = queue.pop_front() {
      for step in graph.steps() {
        if reachable.insert(step.step_id.as_str()) {
          if let Some(sub) = self.subscribers.get(&step.step_id) {
            queue.push_back(&sub.graph);
          }
        }
      }
    }

    let mut parents: Vec<&String> = self.subscribers.keys().collect();
    parents.sort();
    for parent in parents {
      if !reachable.contains(parent.as_str()) {
        return Err(WorkflowError::UnreachableSubscriber {
          parent_step_id: parent.clone(),
        });
      }
    }

    Ok(())
  }
}

/// Turn a sequence of entries into steps with explicit dependencies.
///
/// A step without `depends_on` depends on every step of the previous entry.
fn flatten(entries: Vec<StepEntry>) -> Vec<StepNode> {
  let mut steps = Vec::new();
  let mut previous: Vec<String> = Vec::new();

  for entry in entries {
    let group = match entry {
      StepEntry::Step(def) => vec![def],
      StepEntry::Parallel { parallel } => parallel,
    };
    if group.is_empty() {
      continue;
    }

    let ids: Vec<String> = group.iter().map(|d| d.step_id.clone()).collect();
    for mut def in group {
      let depends_on = def.depends_on.take().unwrap_or_else(|| previous.clone());
      steps.push(StepNode::from_def(def, depends_on));
    }
    previous = ids;
  }

  steps
}

#[cfg(test)]
mod tests {
  use super::*;
  use weft_config::{StepDef, SubscriberDef};

  fn linear() -> WorkflowDef {
    WorkflowDef::new("linear")
      .step(StepDef::new("a", "echo"))
      .step(StepDef::new("b", "echo"))
      .step(StepDef::new("c", "echo"))
  }

  #[test]
  fn test_sequence_chains_dependencies() {
    let workflow = Workflow::lock(linear()).unwrap();
    let root = workflow.root();

    assert_eq!(root.graph_id(), TRIGGER);
    assert!(root.get("a").unwrap().depends_on.is_empty());
    assert_eq!(root.get("b").unwrap().depends_on, vec!["a".to_string()]);
    assert_eq!(root.get("c").unwrap().depends_on, vec!["b".to_string()]);
  }

  #[test]
  fn test_parallel_group() {
    let def = WorkflowDef::new("fan")
      .step(StepDef::new("start", "echo"))
      .step(StepEntry::Parallel {
        parallel: vec![StepDef::new("left", "echo"), StepDef::new("right", "echo")],
      })
      .step(StepDef::new("end", "echo"));
    let workflow = Workflow::lock(def).unwrap();
    let root = workflow.root();

    assert_eq!(root.get("left").unwrap().depends_on, vec!["start".to_string()]);
    assert_eq!(root.get("right").unwrap().depends_on, vec!["start".to_string()]);
    assert_eq!(
      root.get("end").unwrap().depends_on,
      vec!["left".to_string(), "right".to_string()]
    );
    assert_eq!(root.graph().downstream("left"), &["end".to_string()]);
  }

  #[test]
  fn test_explicit_dependencies_override_chaining() {
    let def = WorkflowDef::new("explicit")
      .step(StepDef::new("a", "echo"))
      .step(StepDef::new("b", "echo").depends_on(Vec::<String>::new()));
    let workflow = Workflow::lock(def).unwrap();
    let root = workflow.root();
    assert!(root.get("b").unwrap().depends_on.is_empty());
    assert!(root.graph().downstream("a").is_empty());
  }

  #[test]
  fn test_duplicate_step_across_subscriber() {
    let def = linear().subscriber(SubscriberDef::new("a").step(StepDef::new("b", "echo")));
    assert_eq!(
      Workflow::lock(def).unwrap_err(),
      WorkflowError::DuplicateStepId {
        step_id: "b".to_string()
      }
    );
  }

  #[test]
  fn test_reserved_trigger_id() {
    let def = WorkflowDef::new("reserved").step(StepDef::new(TRIGGER, "echo"));
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::ReservedStepId { .. })
    ));
  }

  #[test]
  fn test_unknown_dependency() {
    let def = WorkflowDef::new("unknown").step(StepDef::new("a", "echo").depends_on(["missing"]));
    assert_eq!(
      Workflow::lock(def).unwrap_err(),
      WorkflowError::UnknownDependency {
        step_id: "a".to_string(),
        dependency: "missing".to_string()
      }
    );
  }

  #[test]
  fn test_dependency_must_be_in_same_graph() {
    let def = linear().subscriber(
      SubscriberDef::new("c").step(StepDef::new("d", "echo").depends_on(["a"])),
    );
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::UnknownDependency { .. })
    ));
  }

  #[test]
  fn test_cycle_rejected() {
    let def = WorkflowDef::new("cycle")
      .step(StepDef::new("a", "echo").depends_on(["b"]))
      .step(StepDef::new("b", "echo").depends_on(["a"]));
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::CycleDetected { graph_id, .. }) if graph_id == TRIGGER
    ));
  }

  #[test]
  fn test_empty_root_rejected() {
    assert!(matches!(
      Workflow::lock(WorkflowDef::new("empty")),
      Err(WorkflowError::EmptyGraph { .. })
    ));
  }

  #[test]
  fn test_subscriber_parent_must_exist() {
    let def = linear().subscriber(SubscriberDef::new("nope").step(StepDef::new("d", "echo")));
    assert_eq!(
      Workflow::lock(def).unwrap_err(),
      WorkflowError::UnknownSubscriberParent {
        parent_step_id: "nope".to_string()
      }
    );
  }

  #[test]
  fn test_duplicate_subscriber_rejected() {
    let def = linear()
      .subscriber(SubscriberDef::new("a").step(StepDef::new("d", "echo")))
      .subscriber(SubscriberDef::new("a").step(StepDef::new("e", "echo")));
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::DuplicateSubscriber { .. })
    ));
  }

  #[test]
  fn test_subscribers_referencing_each_other_are_unreachable() {
    let def = linear()
      .subscriber(SubscriberDef::new("x").step(StepDef::new("y", "echo")))
      .subscriber(SubscriberDef::new("y").step(StepDef::new("x", "echo")));
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::UnreachableSubscriber { .. })
    ));
  }

  #[test]
  fn test_nested_subscribers() {
    let def = linear()
      .subscriber(SubscriberDef::new("a").step(StepDef::new("d", "echo")))
      .subscriber(SubscriberDef::new("d").step(StepDef::new("e", "echo")));
    let workflow = Workflow::lock(def).unwrap();

    assert_eq!(workflow.graph("d").unwrap().steps()[0].step_id, "e");
    assert_eq!(workflow.graph_of("e"), Some("d"));
    assert_eq!(workflow.graph_of("b"), Some(TRIGGER));
    assert_eq!(workflow.graphs().count(), 3);
  }
}
