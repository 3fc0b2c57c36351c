use std::time::Duration;

use blobflow_delta::{DeltaPolicy, DeltaValidation, RollbackPolicy};
use blobflow_workflow::{Condition, RetryPolicy, WorkflowError, all_hold};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::Event;

/// When and how a provider reacts to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
  /// Event type, e.g. `onCreate`.
  pub event: String,
  /// Evaluated against the event's JSON form and combined with AND.
  /// Empty always matches.
  #[serde(default)]
  pub conditions: Vec<Condition>,
  #[serde(default)]
  pub priority: i32,
  #[serde(rename = "async", default)]
  pub is_async: bool,
}

impl TriggerConfig {
  pub fn new(event: impl Into<String>) -> Self {
    Self {
      event: event.into(),
      conditions: Vec::new(),
      priority: 0,
      is_async: false,
    }
  }

  pub fn with_condition(mut self, condition: Condition) -> Self {
    self.conditions.push(condition);
    self
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  /// Dispatch in the background instead of inline.
  pub fn asynchronous(mut self) -> Self {
    self.is_async = true;
    self
  }

  /// Whether the trigger fires for an event whose JSON form is `context`.
  pub fn matches(&self, event: &Event, context: &Value) -> bool {
    self.event == event.event_type && all_hold(&self.conditions, context)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
  /// Executions of this provider allowed in flight at once. 0 means unbounded.
  pub max_concurrent_jobs: u32,
  /// Requests per minute, forwarded to the execution backend. 0 means unlimited.
  pub rate_limit: u32,
  /// Bound on each dispatch of this provider. 0 means unbounded.
  pub timeout_seconds: u64,
  pub retry_policy: RetryPolicy,
  pub parameters: Map<String, Value>,
  /// Applied to the deltas this provider's executions produce.
  pub delta_validation: DeltaValidation,
  pub rollback: RollbackPolicy,
}

impl Default for ProviderConfig {
  fn default() -> Self {
    Self {
      max_concurrent_jobs: 10,
      rate_limit: 0,
      timeout_seconds: 300,
      retry_policy: RetryPolicy::default(),
      parameters: Map::new(),
      delta_validation: DeltaValidation::default(),
      rollback: RollbackPolicy::default(),
    }
  }
}

impl ProviderConfig {
  pub fn timeout(&self) -> Option<Duration> {
    (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
  }

  pub fn delta_policy(&self) -> DeltaPolicy {
    DeltaPolicy {
      validation: self.delta_validation.clone(),
      rollback: self.rollback.clone(),
    }
  }
}

fn default_active() -> bool {
  true
}

/// A participant that runs workflows in reaction to blob lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
  pub provider_id: String,
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type", default)]
  pub provider_type: String,
  /// Dispatched in this order.
  #[serde(default)]
  pub workflow_ids: Vec<String>,
  #[serde(default)]
  pub triggers: Vec<TriggerConfig>,
  #[serde(default)]
  pub config: ProviderConfig,
  #[serde(default = "default_active")]
  pub active: bool,
}

impl Provider {
  pub fn new(provider_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      provider_id: provider_id.into(),
      name: name.into(),
      provider_type: String::new(),
      workflow_ids: Vec::new(),
      triggers: Vec::new(),
      config: ProviderConfig::default(),
      active: true,
    }
  }

  pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
    self.workflow_ids.push(workflow_id.into());
    self
  }

  pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
    self.triggers.push(trigger);
    self
  }

  pub fn with_config(mut self, config: ProviderConfig) -> Self {
    self.config = config;
    self
  }

  pub fn inactive(mut self) -> Self {
    self.active = false;
    self
  }

  /// Check every trigger condition, e.g. that regex patterns compile.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    self
      .triggers
      .iter()
      .flat_map(|t| t.conditions.iter())
      .try_for_each(Condition::validate)
  }

  /// The first trigger that fires for `event`.
  ///
  /// Inactive providers and events this provider originated never match.
  pub fn matching_trigger(&self, event: &Event) -> Option<&TriggerConfig> {
    if !self.active || event.originated_by(&self.provider_id) {
      return None;
    }
    let context = event.context();
    self.triggers.iter().find(|t| t.matches(event, &context))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use blobflow_workflow::Operator;
  use serde_json::json;

  fn article_provider() -> Provider {
    Provider::new("summarizer", "Summarizer")
      .with_workflow("summarize")
      .with_trigger(
        TriggerConfig::new("onCreate")
          .with_condition(Condition::new("data.content_type", Operator::Eq, "article"))
          .with_priority(5),
      )
      .with_trigger(TriggerConfig::new("onCreate").asynchronous())
  }

  #[test]
  fn test_first_satisfying_trigger_wins() {
    let provider = article_provider();

    let article = Event::new("onCreate", "b", "u").with_data("content_type", json!("article"));
    let trigger = provider.matching_trigger(&article).unwrap();
    assert_eq!(trigger.priority, 5);
    assert!(!trigger.is_async);

    let image = Event::new("onCreate", "b", "u").with_data("content_type", json!("image"));
    assert!(provider.matching_trigger(&image).unwrap().is_async);

    assert!(provider.matching_trigger(&Event::new("onDelete", "b", "u")).is_none());
  }

  #[test]
  fn test_self_originated_events_never_match() {
    let provider = article_provider();
    let event = Event::new("onCreate", "b", "u").from_provider("summarizer");
    assert!(provider.matching_trigger(&event).is_none());

    let other = Event::new("onCreate", "b", "u").from_provider("tagger");
    assert!(provider.matching_trigger(&other).is_some());
  }

  #[test]
  fn test_inactive_provider_never_matches() {
    let provider = article_provider().inactive();
    assert!(provider.matching_trigger(&Event::new("onCreate", "b", "u")).is_none());
  }

  #[test]
  fn test_validate_rejects_bad_pattern() {
    let provider = Provider::new("p", "P").with_trigger(
      TriggerConfig::new("onUpdate").with_condition(Condition::new("data.title", Operator::Matches, "(")),
    );
    assert!(provider.validate().is_err());
  }

  #[test]
  fn test_deserialize_defaults() {
    let provider: Provider = serde_json::from_value(json!({
      "provider_id": "tagger",
      "workflow_ids": ["tag"],
      "triggers": [{ "event": "onUpdate", "async": true }],
      "config": { "timeout_seconds": 0 }
    }))
    .unwrap();

    assert!(provider.active);
    assert!(provider.triggers[0].is_async);
    assert_eq!(provider.config.timeout(), None);
    assert_eq!(provider.config.max_concurrent_jobs, 10);
  }
}
