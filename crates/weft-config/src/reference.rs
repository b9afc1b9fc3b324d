//! Step input references.
//!
//! A step's `variables` map input names to references into the run context.
//! Paths are dotted (`user.emails.0`); an empty path selects the whole value.
//!
//! ```json
//! {
//!   "email": { "source": "trigger", "path": "user.email" },
//!   "count": { "source": "step", "step_id": "fetch", "path": "items.length" },
//!   "greeting": { "source": "template", "template": "Hello {{ trigger_data.name | title }}!" }
//! }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Reference {
  /// A value from the trigger data.
  Trigger {
    #[serde(default)]
    path: String,
  },
  /// A value from a prior step's output.
  Step {
    step_id: String,
    #[serde(default)]
    path: String,
  },
  /// A minijinja template rendered against `{ trigger_data, steps }`.
  Template { template: String },
}
