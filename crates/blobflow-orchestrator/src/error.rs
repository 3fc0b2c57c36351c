//! Orchestrator error types.

use std::time::Duration;

use blobflow_backend::{BackendError, ExecutionFailure};
use blobflow_delta::DeltaError;
use blobflow_provider::RegistryError;

use crate::report::ProviderOutcome;

/// Errors raised while registering providers or processing an event.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  /// Duplicate provider, unknown workflow or invalid workflow graph.
  #[error(transparent)]
  Registration(#[from] RegistryError),

  /// The execution backend could not be asked to run or describe a workflow.
  #[error("provider '{provider_id}' could not reach workflow '{workflow_id}': {source}")]
  Dispatch {
    provider_id: String,
    workflow_id: String,
    #[source]
    source: BackendError,
  },

  /// The backend ran the workflow and reported a failure.
  #[error("provider '{provider_id}' execution {execution_id} of '{workflow_id}' failed: {failure}")]
  Execution {
    provider_id: String,
    workflow_id: String,
    execution_id: String,
    failure: ExecutionFailure,
  },

  /// Extracting, storing or applying the execution's deltas failed.
  #[error("provider '{provider_id}' deltas rejected: {source}")]
  Delta {
    provider_id: String,
    #[source]
    source: DeltaError,
  },

  #[error("provider '{provider_id}' exceeded its {}s timeout", .limit.as_secs())]
  Timeout { provider_id: String, limit: Duration },

  #[error("processing cancelled")]
  Cancelled,

  /// A provider's dispatch failed. The outcome records the phase it ended
  /// in and the executions that finished before the failure.
  #[error("{source} (provider ended {})", .outcome.phase)]
  Provider {
    outcome: Box<ProviderOutcome>,
    #[source]
    source: Box<OrchestratorError>,
  },

  /// One or more asynchronously dispatched providers failed.
  #[error("{} async providers failed", .failures.len())]
  Aggregate { failures: Vec<OrchestratorError> },

  /// A dispatch task panicked.
  #[error("dispatch task failed: {message}")]
  Join { message: String },
}

impl OrchestratorError {
  /// The provider the error is attributed to, if any.
  pub fn provider_id(&self) -> Option<&str> {
    match self {
      Self::Dispatch { provider_id, .. }
      | Self::Execution { provider_id, .. }
      | Self::Delta { provider_id, .. }
      | Self::Timeout { provider_id, .. } => Some(provider_id),
      Self::Provider { outcome, .. } => Some(&outcome.provider_id),
      _ => None,
    }
  }

  /// Outcome of the failed provider dispatch, if the error carries one.
  pub fn outcome(&self) -> Option<&ProviderOutcome> {
    match self {
      Self::Provider { outcome, .. } => Some(outcome),
      _ => None,
    }
  }

  /// The underlying error, without the provider outcome wrapper.
  pub fn cause(&self) -> &OrchestratorError {
    match self {
      Self::Provider { source, .. } => source.cause(),
      other => other,
    }
  }

  /// Failures of an aggregate, or the error itself.
  pub fn failures(&self) -> Vec<&OrchestratorError> {
    match self {
      Self::Aggregate { failures } => failures.iter().collect(),
      other => vec![other],
    }
  }

  pub fn is_conflict(&self) -> bool {
    match self {
      Self::Delta { source, .. } => source.is_conflict(),
      Self::Provider { source, .. } => source.is_conflict(),
      Self::Aggregate { failures } => failures.iter().any(Self::is_conflict),
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::report::{DispatchMode, DispatchPhase};

  #[test]
  fn test_aggregate_message_and_failures() {
    let err = OrchestratorError::Aggregate {
      failures: vec![
        OrchestratorError::Timeout {
          provider_id: "a".to_string(),
          limit: Duration::from_secs(3),
        },
        OrchestratorError::Cancelled,
      ],
    };

    assert_eq!(err.to_string(), "2 async providers failed");
    assert_eq!(err.failures().len(), 2);
    assert_eq!(err.failures()[0].provider_id(), Some("a"));
    assert_eq!(
      err.failures()[0].to_string(),
      "provider 'a' exceeded its 3s timeout"
    );
  }

  #[test]
  fn test_provider_wrapper_exposes_outcome_and_cause() {
    let err = OrchestratorError::Provider {
      outcome: Box::new(ProviderOutcome {
        provider_id: "a".to_string(),
        mode: DispatchMode::Sync,
        phase: DispatchPhase::Failed,
        failed_at: Some(DispatchPhase::Executing),
        executions: Vec::new(),
      }),
      source: Box::new(OrchestratorError::Cancelled),
    };

    assert_eq!(err.provider_id(), Some("a"));
    assert_eq!(err.outcome().map(|o| o.failed_at), Some(Some(DispatchPhase::Executing)));
    assert!(matches!(err.cause(), OrchestratorError::Cancelled));
    assert_eq!(err.to_string(), "processing cancelled (provider ended failed)");
  }
}
