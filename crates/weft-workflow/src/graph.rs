use std::collections::HashMap;

use crate::StepNode;

/// Dependency edges of one step graph, pointing from a step to its dependents.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
  dependents: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build the edges from the steps' declared dependencies.
  ///
  /// Ids named only as dependencies still get an entry, so a cycle through
  /// them is found before the unknown dependency is reported.
  pub fn new(steps: &[StepNode]) -> Self {
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for step in steps {
      dependents.entry(step.step_id.clone()).or_default();
    }
    for step in steps {
      for dependency in &step.depends_on {
        dependents
          .entry(dependency.clone())
          .or_default()
          .push(step.step_id.clone());
      }
    }
    Self { dependents }
  }

  /// Steps that depend on `step_id`, in declaration order.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .dependents
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Find a step that lies on a dependency cycle, if any.
  pub fn find_cycle(&self) -> Option<String> {
    // 0 = unvisited, 1 = in progress, 2 = done
    let mut color: HashMap<&str, u8> = self.dependents.keys().map(|id| (id.as_str(), 0)).collect();

    fn dfs<'a>(
      step: &'a str,
      dependents: &'a HashMap<String, Vec<String>>,
      color: &mut HashMap<&'a str, u8>,
    ) -> Option<&'a str> {
      color.insert(step, 1);

      if let Some(neighbors) = dependents.get(step) {
        for neighbor in neighbors {
          match color.get(neighbor.as_str()) {
            // Back edge
            Some(1) => return Some(neighbor.as_str()),
            Some(0) => {
              if let Some(found) = dfs(neighbor.as_str(), dependents, color) {
                return Some(found);
              }
            }
            _ => {}
          }
        }
      }

      color.insert(step, 2);
      None
    }

    let mut ids: Vec<&String> = self.dependents.keys().collect();
    ids.sort();

    for id in ids {
      if color.get(id.as_str()) == Some(&0) {
        if let Some(found) = dfs(id.as_str(), &self.dependents, &mut color) {
          return Some(found.to_string());
        }
      }
    }

    None
  }
}
