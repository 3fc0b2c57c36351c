//! Turning workflow output into deltas.
//!
//! ```json
//! { "deltas": [ { "type": "update", "path": "/title", "new_value": "Hi" } ] }
//! ```
//! produces one delta per entry. Any other non-empty output, e.g.
//! `{ "result": 42 }`, produces a single synthetic `transform` delta at the
//! root carrying the whole output.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::delta::{Delta, DeltaType, ROOT_PATH};
use crate::error::DeltaError;

const DELTAS_KEY: &str = "deltas";

#[derive(Debug, Deserialize)]
struct DeltaEntry {
  #[serde(rename = "type", alias = "delta_type")]
  delta_type: DeltaType,
  #[serde(default = "root_path")]
  path: String,
  #[serde(default, alias = "oldValue")]
  old_value: Option<Value>,
  #[serde(default, alias = "newValue")]
  new_value: Option<Value>,
  #[serde(default)]
  metadata: Map<String, Value>,
}

fn root_path() -> String {
  ROOT_PATH.to_string()
}

/// Extract the deltas a workflow execution produced.
///
/// Sequences are left at zero; they are assigned when the delta is stored.
pub fn extract_deltas(
  blob_id: &str,
  provider_id: &str,
  output: &Value,
) -> Result<Vec<Delta>, DeltaError> {
  if let Some(entries) = output.get(DELTAS_KEY) {
    let entries = entries.as_array().ok_or_else(|| DeltaError::InvalidDelta {
      message: format!("'{}' must be a list", DELTAS_KEY),
    })?;

    return entries
      .iter()
      .enumerate()
      .map(|(index, entry)| parse_entry(blob_id, provider_id, index, entry))
      .collect();
  }

  if is_empty_output(output) {
    return Ok(Vec::new());
  }

  let mut delta = Delta::new(blob_id, provider_id, DeltaType::Transform, ROOT_PATH)
    .with_new_value(output.clone());
  delta.metadata.insert("synthetic".to_string(), json!(true));
  delta
    .metadata
    .insert("origin".to_string(), json!("workflow_output"));

  Ok(vec![delta])
}

fn parse_entry(
  blob_id: &str,
  provider_id: &str,
  index: usize,
  entry: &Value,
) -> Result<Delta, DeltaError> {
  let entry: DeltaEntry =
    serde_json::from_value(entry.clone()).map_err(|e| DeltaError::InvalidDelta {
      message: format!("delta entry {}: {}", index, e),
    })?;

  if entry.new_value.is_none() && entry.delta_type != DeltaType::Delete {
    return Err(DeltaError::InvalidDelta {
      message: format!("delta entry {}: {} requires new_value", index, entry.delta_type),
    });
  }

  let mut delta = Delta::new(blob_id, provider_id, entry.delta_type, entry.path);
  delta.old_value = entry.old_value;
  delta.new_value = entry.new_value;
  delta.metadata = entry.metadata;
  Ok(delta)
}

fn is_empty_output(output: &Value) -> bool {
  match output {
    Value::Null => true,
    Value::Object(map) => map.is_empty(),
    Value::Array(items) => items.is_empty(),
    _ => false,
  }
}
