//! Blobflow Orchestrator
//!
//! Ties the other crates together. The [`Orchestrator`] receives blob
//! lifecycle events, selects providers through the
//! [`ProviderRegistry`](blobflow_provider::ProviderRegistry), runs their
//! workflows on an [`ExecutionBackend`](blobflow_backend::ExecutionBackend),
//! turns the output into deltas applied through a
//! [`DeltaStore`](blobflow_delta::DeltaStore), and publishes the results to
//! an [`EventBus`].
//!
//! # Usage
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(
//!   Arc::new(ProviderRegistry::new()),
//!   Arc::new(HttpBackend::new("http://localhost:8080")?),
//!   Arc::new(MemoryDeltaStore::new()),
//!   Arc::new(NoopEventBus),
//!   OrchestratorConfig::default(),
//! );
//!
//! orchestrator.register_provider(provider).await?;
//! let report = orchestrator.process_blob("blob-1", "user1", "onCreate").await?;
//! ```

mod config;
mod error;
mod events;
mod orchestrator;
mod report;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use events::{ChannelEventBus, EventBus, NoopEventBus, PublishError};
pub use orchestrator::Orchestrator;
pub use report::{DispatchMode, DispatchPhase, ExecutionSummary, ProcessReport, ProviderOutcome};
