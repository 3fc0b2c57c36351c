//! What processing an event produced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How far a provider's dispatch got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
  TriggerMatched,
  Dispatching,
  Executing,
  DeltaExtraction,
  DeltaApplication,
  EventPublished,
  Failed,
  RolledBack,
}

impl fmt::Display for DispatchPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::TriggerMatched => "trigger_matched",
      Self::Dispatching => "dispatching",
      Self::Executing => "executing",
      Self::DeltaExtraction => "delta_extraction",
      Self::DeltaApplication => "delta_application",
      Self::EventPublished => "event_published",
      Self::Failed => "failed",
      Self::RolledBack => "rolled_back",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
  Sync,
  Async,
}

/// One workflow execution run on behalf of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
  pub workflow_id: String,
  pub execution_id: String,
  pub applied: usize,
  pub skipped: usize,
  /// Blob head sequence after the deltas were applied.
  pub head_sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
  pub provider_id: String,
  pub mode: DispatchMode,
  pub phase: DispatchPhase,
  /// Phase the dispatch was in when it failed.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failed_at: Option<DispatchPhase>,
  pub executions: Vec<ExecutionSummary>,
}

impl ProviderOutcome {
  pub fn applied(&self) -> usize {
    self.executions.iter().map(|e| e.applied).sum()
  }
}

/// Result of processing one event. Outcomes are ordered by provider id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
  pub event_id: String,
  pub event_type: String,
  pub blob_id: String,
  pub outcomes: Vec<ProviderOutcome>,
}

impl ProcessReport {
  pub fn outcome(&self, provider_id: &str) -> Option<&ProviderOutcome> {
    self.outcomes.iter().find(|o| o.provider_id == provider_id)
  }

  /// Deltas applied across every provider.
  pub fn applied(&self) -> usize {
    self.outcomes.iter().map(ProviderOutcome::applied).sum()
  }
}
