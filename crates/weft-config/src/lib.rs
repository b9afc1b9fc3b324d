//! Weft Config
//!
//! This crate contains the serializable workflow configuration types for Weft.
//! These types represent workflow definitions before they are validated and
//! locked by `weft-workflow`.
//!
//! Configuration can be loaded from:
//! - JSON files (via the CLI, `weft run workflow.json`)
//! - Database storage (as JSON blobs)
//!
//! # Example
//!
//! ```json
//! {
//!   "name": "review",
//!   "steps": [
//!     { "step_id": "fetch", "action": "echo" },
//!     { "parallel": [
//!       { "step_id": "lint", "action": "echo" },
//!       { "step_id": "approve", "action": "approval" }
//!     ] },
//!     { "step_id": "publish", "action": "echo", "retry": { "attempts": 3 } }
//!   ],
//!   "subscribers": [
//!     { "parent_step_id": "publish", "steps": [{ "step_id": "notify", "action": "echo" }] }
//!   ]
//! }
//! ```

mod condition;
mod enums;
mod reference;
mod step;
mod workflow;

pub use condition::Condition;
pub use enums::{CompareOp, JoinStrategy};
pub use reference::Reference;
pub use step::{RetryConfig, StepDef, StepEntry};
pub use workflow::{SubscriberDef, WorkflowDef};
