use std::fmt;

use blobflow_workflow::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a workflow execution runs against.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionInput {
  pub blob_id: String,
  #[serde(default)]
  pub user_id: String,
  pub provider_id: String,
  /// The provider's configured parameters.
  #[serde(default)]
  pub parameters: Map<String, Value>,
  /// Metadata of the triggering event: id, type, origin and payload.
  #[serde(default)]
  pub event: Map<String, Value>,
  /// Blob data as of dispatch.
  #[serde(default)]
  pub blob: Value,
}

/// Dispatch hints forwarded with every execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
  pub request_id: String,
  pub event_id: String,
  pub event_type: String,
  /// Blob head sequence observed when the execution was requested.
  pub base_sequence: u64,
  pub timeout_seconds: u64,
  pub rate_limit: u32,
  pub max_concurrent_jobs: u32,
  pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
  pub workflow_id: String,
  pub input: ExecutionInput,
  #[serde(default)]
  pub context: ExecutionContext,
  /// Scheduling hint for the backend. Not used for ordering locally.
  #[serde(default)]
  pub priority: i32,
  /// Ask the backend to return before the execution finishes.
  #[serde(rename = "async", default)]
  pub is_async: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }
}

impl fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    };
    f.write_str(name)
  }
}

/// Why a remote execution failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
  pub code: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_id: Option<String>,
}

impl ExecutionFailure {
  pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      code: code.into(),
      message: message.into(),
      step_id: None,
    }
  }

  pub fn at_step(mut self, step_id: impl Into<String>) -> Self {
    self.step_id = Some(step_id.into());
    self
  }
}

impl fmt::Display for ExecutionFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.step_id {
      Some(step_id) => write!(f, "[{}] step '{}': {}", self.code, step_id, self.message),
      None => write!(f, "[{}] {}", self.code, self.message),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
  pub execution_id: String,
  pub status: ExecutionStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ExecutionFailure>,
}

impl ExecutionResponse {
  pub fn completed(execution_id: impl Into<String>, output: Value) -> Self {
    Self {
      execution_id: execution_id.into(),
      status: ExecutionStatus::Completed,
      output: Some(output),
      error: None,
    }
  }

  pub fn failed(execution_id: impl Into<String>, failure: ExecutionFailure) -> Self {
    Self {
      execution_id: execution_id.into(),
      status: ExecutionStatus::Failed,
      output: None,
      error: Some(failure),
    }
  }

  pub fn pending(execution_id: impl Into<String>) -> Self {
    Self {
      execution_id: execution_id.into(),
      status: ExecutionStatus::Pending,
      output: None,
      error: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_request_wire_shape() {
    let request = ExecuteRequest {
      workflow_id: "summarize".to_string(),
      input: ExecutionInput {
        blob_id: "b".to_string(),
        provider_id: "p".to_string(),
        ..Default::default()
      },
      context: ExecutionContext::default(),
      priority: 3,
      is_async: true,
    };
    let value = serde_json::to_value(&request).unwrap();

    assert_eq!(value["async"], true);
    assert_eq!(value["priority"], 3);
    assert_eq!(value["input"]["blob_id"], "b");
  }

  #[test]
  fn test_response_from_minimal_json() {
    let response: ExecutionResponse = serde_json::from_value(json!({
      "execution_id": "e1",
      "status": "failed",
      "error": { "code": "STEP_FAILED", "message": "boom", "step_id": "expand" }
    }))
    .unwrap();

    assert!(response.status.is_terminal());
    assert_eq!(
      response.error.unwrap().to_string(),
      "[STEP_FAILED] step 'expand': boom"
    );
    assert!(!ExecutionStatus::Running.is_terminal());
  }
}
