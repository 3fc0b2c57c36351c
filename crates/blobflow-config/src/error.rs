use std::path::PathBuf;

use blobflow_workflow::WorkflowError;

/// Errors raised while loading or checking a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid JSON manifest: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid YAML manifest: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("provider '{provider_id}' is declared more than once")]
  DuplicateProvider { provider_id: String },

  #[error("workflow '{workflow_id}' is declared more than once")]
  DuplicateWorkflow { workflow_id: String },

  #[error("workflow '{workflow_id}' is invalid: {source}")]
  InvalidWorkflow {
    workflow_id: String,
    #[source]
    source: WorkflowError,
  },

  #[error("provider '{provider_id}' has an invalid trigger: {source}")]
  InvalidTrigger {
    provider_id: String,
    #[source]
    source: WorkflowError,
  },
}
