//! Step input resolution.
//!
//! A step with `variables` receives an object of resolved references. A step
//! without receives its default input:
//! - no dependencies: the machine's entry input (trigger data for the root
//!   graph, the parent step's output for a subscriber graph)
//! - one dependency: that dependency's output
//! - several: an object keyed by dependency id
//!
//! Outputs of steps that did not succeed resolve to `null`.

use minijinja::Environment;
use serde_json::{Map, Value};
use weft_config::Reference;
use weft_store::MachineContext;
use weft_workflow::StepNode;

use crate::condition::{context_view, lookup};
use crate::error::RuntimeError;

/// Resolve the input for a step about to run.
pub fn resolve_input(
  step: &StepNode,
  entry_input: &Value,
  context: &MachineContext,
) -> Result<Value, RuntimeError> {
  if !step.variables.is_empty() {
    let mut env: Option<Environment<'static>> = None;
    let mut resolved = Map::new();
    for (name, reference) in &step.variables {
      let value = resolve_reference(&step.step_id, reference, context, &mut env)?;
      resolved.insert(name.clone(), value);
    }
    return Ok(Value::Object(resolved));
  }

  let output = |id: &String| context.output(id).cloned().unwrap_or(Value::Null);
  Ok(match step.depends_on.as_slice() {
    [] => entry_input.clone(),
    [only] => output(only),
    many => Value::Object(many.iter().map(|id| (id.clone(), output(id))).collect()),
  })
}

fn resolve_reference(
  step_id: &str,
  reference: &Reference,
  context: &MachineContext,
  env: &mut Option<Environment<'static>>,
) -> Result<Value, RuntimeError> {
  match reference {
    Reference::Trigger { path } => Ok(
      lookup(&context.trigger_data, path)
        .cloned()
        .unwrap_or(Value::Null),
    ),
    Reference::Step { step_id: source, path } => Ok(
      context
        .output(source)
        .and_then(|output| lookup(output, path))
        .cloned()
        .unwrap_or(Value::Null),
    ),
    Reference::Template { template } => {
      let env = env.get_or_insert_with(Environment::new);
      resolve_template(env, step_id, template, context).map(Value::String)
    }
  }
}

/// Render a template against the condition view,
/// `{ trigger_data, steps: { <id>: { status, output } } }`.
fn resolve_template(
  env: &Environment<'static>,
  step_id: &str,
  template: &str,
  context: &MachineContext,
) -> Result<String, RuntimeError> {
  env
    .render_str(template, context_view(context))
    .map_err(|e| RuntimeError::InputResolution {
      step_id: step_id.to_string(),
      message: e.to_string(),
    })
}
