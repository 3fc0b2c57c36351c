use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::expr::Condition;
use crate::value_ref::ValueRef;

/// Kind of work a step performs.
///
/// Unknown tags are kept verbatim as [`StepType::Custom`] so that execution
/// backends can define their own step kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
  Validate,
  #[default]
  Transform,
  Enrich,
  Analyze,
  Notify,
  Custom(String),
}

impl StepType {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Validate => "validate",
      Self::Transform => "transform",
      Self::Enrich => "enrich",
      Self::Analyze => "analyze",
      Self::Notify => "notify",
      Self::Custom(tag) => tag,
    }
  }
}

impl fmt::Display for StepType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<String> for StepType {
  fn from(value: String) -> Self {
    match value.as_str() {
      "validate" => Self::Validate,
      "transform" => Self::Transform,
      "enrich" => Self::Enrich,
      "analyze" => Self::Analyze,
      "notify" => Self::Notify,
      _ => Self::Custom(value),
    }
  }
}

impl From<&str> for StepType {
  fn from(value: &str) -> Self {
    Self::from(value.to_string())
  }
}

impl From<StepType> for String {
  fn from(value: StepType) -> Self {
    value.as_str().to_string()
  }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
  #[default]
  Fail,
  Skip,
  Retry,
}

/// Backoff description for retried steps and providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff_multiplier: f64,
  pub initial_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff_multiplier: 2.0,
      initial_delay_ms: 100,
      max_delay_ms: 10_000,
    }
  }
}

impl RetryPolicy {
  /// Delay before retry number `retry` (1-based), capped at `max_delay_ms`.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1) as i32;
    let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
    Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
  }
}

/// Per-step execution settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
  /// 0 means no step-level timeout.
  pub timeout_secs: u64,
  pub max_retries: u32,
  /// Hint that the step may share a level with its siblings.
  pub parallel: bool,
  pub cache_results: bool,
  pub cache_ttl_secs: u64,
  pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl StepConfig {
  pub fn timeout(&self) -> Option<Duration> {
    (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
  }
}

/// A single unit of work within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub step_id: String,
  #[serde(default)]
  pub name: String,
  /// Provider that owns the step. May name a different provider than the
  /// workflow's owner, which is what the provider DAG is built from.
  #[serde(default)]
  pub provider_id: String,
  #[serde(rename = "type", default)]
  pub step_type: StepType,
  #[serde(default)]
  pub input_map: BTreeMap<String, ValueRef>,
  #[serde(default)]
  pub output_map: BTreeMap<String, ValueRef>,
  #[serde(default)]
  pub config: StepConfig,
  #[serde(default)]
  pub depends_on: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
  #[serde(default)]
  pub on_failure: OnFailure,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry_policy: Option<RetryPolicy>,
}

impl Step {
  pub fn new(step_id: impl Into<String>, step_type: impl Into<StepType>) -> Self {
    let step_id = step_id.into();
    Self {
      name: step_id.clone(),
      step_id,
      provider_id: String::new(),
      step_type: step_type.into(),
      input_map: BTreeMap::new(),
      output_map: BTreeMap::new(),
      config: StepConfig::default(),
      depends_on: Vec::new(),
      condition: None,
      on_failure: OnFailure::default(),
      retry_policy: None,
    }
  }

  /// Declare a dependency on another step.
  pub fn after(mut self, step_id: impl Into<String>) -> Self {
    self.depends_on.push(step_id.into());
    self
  }

  pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
    self.provider_id = provider_id.into();
    self
  }

  pub fn with_input(mut self, name: impl Into<String>, reference: ValueRef) -> Self {
    self.input_map.insert(name.into(), reference);
    self
  }

  pub fn with_output(mut self, name: impl Into<String>, reference: ValueRef) -> Self {
    self.output_map.insert(name.into(), reference);
    self
  }

  pub fn with_condition(mut self, condition: Condition) -> Self {
    self.condition = Some(condition);
    self
  }

  pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
    self.on_failure = on_failure;
    self
  }

  pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
    self.retry_policy = Some(policy);
    self
  }

  /// Step ids read through `$.steps.<id>.output` references.
  pub fn referenced_steps(&self) -> BTreeSet<&str> {
    self
      .input_map
      .values()
      .chain(self.output_map.values())
      .filter_map(ValueRef::step_id)
      .collect()
  }
}
