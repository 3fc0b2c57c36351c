//! Blobflow Config
//!
//! A manifest lists the workflow definitions and providers to register
//! with an orchestrator, plus process settings. Manifests are JSON, or YAML
//! when the file extension is `.yaml` / `.yml`:
//!
//! ```yaml
//! settings:
//!   backend_url: http://localhost:8080
//! workflows:
//!   - workflow_id: summarize
//!     provider_id: summarizer
//!     name: Summarize
//!     steps:
//!       - { step_id: validate, type: validate }
//!       - { step_id: expand, type: enrich, depends_on: [validate] }
//! providers:
//!   - provider_id: summarizer
//!     workflow_ids: [summarize]
//!     triggers:
//!       - { event: onCreate, async: false }
//! ```

mod error;
mod manifest;

pub use error::ConfigError;
pub use manifest::{Format, Manifest, Settings};
