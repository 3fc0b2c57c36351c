//! Blobflow Backend
//!
//! The [`ExecutionBackend`] trait is the boundary between the orchestrator
//! and whatever actually runs workflow steps. [`HttpBackend`] implements it
//! over HTTP+JSON; in-process implementations live elsewhere.

mod backend;
mod error;
mod http;
mod types;

pub use backend::ExecutionBackend;
pub use error::BackendError;
pub use http::{DEFAULT_TIMEOUT, HttpBackend};
pub use types::{
  ExecuteRequest, ExecutionContext, ExecutionFailure, ExecutionInput, ExecutionResponse,
  ExecutionStatus,
};
