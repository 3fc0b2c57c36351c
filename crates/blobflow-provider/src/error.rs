use blobflow_workflow::WorkflowError;

/// Errors raised by the provider registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("provider '{provider_id}' is already registered")]
  DuplicateProvider { provider_id: String },

  #[error("provider '{provider_id}' not found")]
  ProviderNotFound { provider_id: String },

  #[error("workflow '{workflow_id}' not found")]
  WorkflowNotFound { workflow_id: String },

  #[error("invalid workflow '{workflow_id}': {source}")]
  InvalidWorkflow {
    workflow_id: String,
    #[source]
    source: WorkflowError,
  },

  #[error("invalid trigger on provider '{provider_id}': {source}")]
  InvalidTrigger {
    provider_id: String,
    #[source]
    source: WorkflowError,
  },

  #[error("provider graph: {0}")]
  ProviderGraph(#[source] WorkflowError),
}
