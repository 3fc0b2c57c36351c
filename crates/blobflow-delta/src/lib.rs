//! Blobflow Delta
//!
//! A delta is an atomic, addressable mutation of a blob's JSON data. This
//! crate turns workflow output into deltas, validates them, and applies
//! them through a [`DeltaStore`] that detects races between concurrently
//! started executions and compensates failed batches according to a
//! [`RollbackPolicy`].

mod apply;
mod delta;
mod error;
mod extract;
mod policy;
mod store;

pub use delta::{Delta, DeltaType, ROOT_PATH, paths_overlap, pointer_tokens};
pub use error::DeltaError;
pub use extract::extract_deltas;
pub use policy::{
  ConflictResolution, DeltaPolicy, DeltaValidation, RollbackPolicy, RollbackStrategy,
  SchemaValidator, Severity, ValidationRule,
};
pub use store::{ApplyReport, BlobState, DeltaStore, FlaggedBatch, MemoryDeltaStore, PendingRollback};
