use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event types the orchestrator emits.
pub const DELTA_APPLIED: &str = "delta.applied";
pub const WORKFLOW_COMPLETED: &str = "workflow.completed";

/// Well-known blob lifecycle event names.
pub const ON_CREATE: &str = "onCreate";
pub const ON_UPDATE: &str = "onUpdate";
pub const ON_DELETE: &str = "onDelete";

/// The unit exchanged with the event bus.
///
/// `provider_id` is the provider whose output caused the event, if any.
/// Providers never react to events they originated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub event_id: String,
  #[serde(rename = "type")]
  pub event_type: String,
  pub blob_id: String,
  #[serde(default)]
  pub user_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider_id: Option<String>,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub data: Map<String, Value>,
}

impl Event {
  pub fn new(
    event_type: impl Into<String>,
    blob_id: impl Into<String>,
    user_id: impl Into<String>,
  ) -> Self {
    Self {
      event_id: uuid::Uuid::new_v4().to_string(),
      event_type: event_type.into(),
      blob_id: blob_id.into(),
      user_id: user_id.into(),
      provider_id: None,
      timestamp: Utc::now(),
      data: Map::new(),
    }
  }

  pub fn from_provider(mut self, provider_id: impl Into<String>) -> Self {
    self.provider_id = Some(provider_id.into());
    self
  }

  pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
    self.data.insert(key.into(), value);
    self
  }

  pub fn originated_by(&self, provider_id: &str) -> bool {
    self.provider_id.as_deref() == Some(provider_id)
  }

  /// The JSON form trigger conditions are evaluated against.
  pub fn context(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }
}

impl fmt::Display for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.event_type, self.blob_id)
  }
}
