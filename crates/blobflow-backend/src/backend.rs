use async_trait::async_trait;
use blobflow_workflow::Workflow;

use crate::error::BackendError;
use crate::types::{ExecuteRequest, ExecutionResponse};

/// Runs workflows on behalf of the orchestrator and owns their definitions.
///
/// Step-level execution state, retries and caching live behind this trait.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
  /// Start (and, unless `request.is_async`, finish) an execution.
  async fn execute_workflow(&self, request: ExecuteRequest) -> Result<ExecutionResponse, BackendError>;

  async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionResponse, BackendError>;

  async fn cancel_execution(&self, execution_id: &str) -> Result<(), BackendError>;

  async fn register_workflow(&self, workflow: &Workflow) -> Result<(), BackendError>;

  async fn update_workflow(&self, workflow: &Workflow) -> Result<(), BackendError>;

  /// Fails with [`BackendError::WorkflowNotFound`] for unknown ids.
  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, BackendError>;

  async fn list_workflows(&self, provider_id: &str) -> Result<Vec<Workflow>, BackendError>;
}
