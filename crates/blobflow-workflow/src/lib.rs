//! Blobflow Workflow
//!
//! This crate provides the workflow model for blobflow: a workflow is a
//! named set of steps with declared dependencies. It validates the graph
//! (unique ids, known dependencies, no cycles) and computes a level-grouped
//! execution order where every step in a level may run in parallel.
//!
//! It also holds the typed expression language shared by step conditions,
//! trigger conditions and delta rules ([`Condition`]), and the typed
//! references used by step input/output maps ([`ValueRef`]).
//!
//! Everything here is pure and synchronous.

mod error;
mod expr;
mod graph;
mod step;
mod value_ref;
mod workflow;

pub use error::WorkflowError;
pub use expr::{Condition, FieldPath, Operator, all_hold};
pub use graph::{Graph, topological_levels};
pub use step::{OnFailure, RetryPolicy, Step, StepConfig, StepType};
pub use value_ref::ValueRef;
pub use workflow::{ProcessingConfig, Workflow};
