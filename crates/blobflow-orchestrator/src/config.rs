use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Orchestrator-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  /// Delay between status polls of a non-terminal execution.
  pub poll_interval_ms: u64,
  /// Dispatch timeout for providers configured with `timeout_seconds: 0`.
  /// 0 leaves those providers unbounded.
  pub default_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: 250,
      default_timeout_secs: 0,
    }
  }
}

impl OrchestratorConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }

  /// The effective dispatch timeout given a provider's own setting.
  pub fn dispatch_timeout(&self, provider_timeout: Option<Duration>) -> Option<Duration> {
    provider_timeout.or_else(|| (self.default_timeout_secs > 0).then(|| Duration::from_secs(self.default_timeout_secs)))
  }
}
