//! Weft Workflow
//!
//! This crate provides the "locked" workflow representation for Weft.
//! A locked workflow is a validated form of a `WorkflowDef` that is ready for
//! execution and never changes afterwards.
//!
//! Key differences from `weft-config`:
//! - Step sequences and parallel groups are flattened into explicit dependencies
//! - Every graph is checked for unknown dependencies and cycles
//! - Step ids are unique across the root graph and every subscriber graph
//! - Every subscriber graph is reachable from the root graph

mod error;
mod graph;
mod step;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use step::{StepGraph, StepNode};
pub use workflow::{Subscriber, TRIGGER, Workflow};
