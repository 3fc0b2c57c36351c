use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root path of a blob's data.
pub const ROOT_PATH: &str = "/";

/// Kind of mutation a delta performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaType {
  Create,
  Update,
  Delete,
  Transform,
}

impl fmt::Display for DeltaType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Transform => "transform",
    };
    f.write_str(name)
  }
}

/// An atomic, addressable mutation of a blob's data.
///
/// `path` is a JSON pointer (`/` is the root). `sequence` is assigned by the
/// store and is strictly increasing per blob; `base_sequence` is the last
/// applied sequence the producing execution observed, and is what conflict
/// detection compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
  pub delta_id: String,
  pub blob_id: String,
  pub provider_id: String,
  #[serde(rename = "type")]
  pub delta_type: DeltaType,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub old_value: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub new_value: Option<Value>,
  #[serde(default)]
  pub metadata: Map<String, Value>,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub sequence: u64,
  #[serde(default)]
  pub base_sequence: u64,
}

impl Delta {
  pub fn new(
    blob_id: impl Into<String>,
    provider_id: impl Into<String>,
    delta_type: DeltaType,
    path: impl Into<String>,
  ) -> Self {
    Self {
      delta_id: uuid::Uuid::new_v4().to_string(),
      blob_id: blob_id.into(),
      provider_id: provider_id.into(),
      delta_type,
      path: path.into(),
      old_value: None,
      new_value: None,
      metadata: Map::new(),
      timestamp: Utc::now(),
      sequence: 0,
      base_sequence: 0,
    }
  }

  pub fn with_new_value(mut self, value: Value) -> Self {
    self.new_value = Some(value);
    self
  }

  pub fn with_old_value(mut self, value: Value) -> Self {
    self.old_value = Some(value);
    self
  }

  pub fn with_base_sequence(mut self, base_sequence: u64) -> Self {
    self.base_sequence = base_sequence;
    self
  }

  /// Decoded pointer tokens of `path`.
  pub fn tokens(&self) -> Vec<String> {
    pointer_tokens(&self.path)
  }
}

/// Split a JSON pointer into unescaped tokens. `""` and `"/"` are the root.
pub fn pointer_tokens(path: &str) -> Vec<String> {
  path
    .split('/')
    .filter(|token| !token.is_empty())
    .map(|token| token.replace("~1", "/").replace("~0", "~"))
    .collect()
}

/// Two paths overlap when one is equal to, or an ancestor of, the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
  let a = pointer_tokens(a);
  let b = pointer_tokens(b);
  let shared = a.len().min(b.len());
  a[..shared] == b[..shared]
}
