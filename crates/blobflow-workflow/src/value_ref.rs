//! Typed references used by step input and output maps.
//!
//! | syntax                               | resolves to                          |
//! |--------------------------------------|--------------------------------------|
//! | `$.blob.data.title`                  | a field of the blob being processed  |
//! | `$.provider.parameters.model`        | a field of the owning provider       |
//! | `$.event.data.reason`                | a field of the triggering event      |
//! | `$.steps.validate.output.score`      | a field of another step's output     |
//! | anything else                        | the literal string                   |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::expr::FieldPath;

const PREFIX: &str = "$.";

/// A parsed reference into the execution scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueRef {
  Blob(FieldPath),
  Provider(FieldPath),
  Event(FieldPath),
  Step { step_id: String, path: FieldPath },
  Literal(String),
}

impl ValueRef {
  pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
    let Some(rest) = raw.strip_prefix(PREFIX) else {
      return Ok(Self::Literal(raw.to_string()));
    };

    let invalid = |message: &str| WorkflowError::InvalidReference {
      reference: raw.to_string(),
      message: message.to_string(),
    };

    let mut segments = rest.split('.').filter(|s| !s.is_empty());
    let scope = segments.next().ok_or_else(|| invalid("missing scope"))?;

    match scope {
      "blob" => Ok(Self::Blob(FieldPath::from_segments(collect(segments)))),
      "provider" => Ok(Self::Provider(FieldPath::from_segments(collect(segments)))),
      "event" => Ok(Self::Event(FieldPath::from_segments(collect(segments)))),
      "steps" => {
        let step_id = segments
          .next()
          .ok_or_else(|| invalid("missing step id"))?
          .to_string();
        match segments.next() {
          Some("output") => Ok(Self::Step {
            step_id,
            path: FieldPath::from_segments(collect(segments)),
          }),
          _ => Err(invalid("step references must continue with '.output'")),
        }
      }
      other => Err(invalid(&format!(
        "unknown scope '{}', expected blob, provider, event or steps",
        other
      ))),
    }
  }

  /// The step this reference reads from, if any.
  pub fn step_id(&self) -> Option<&str> {
    match self {
      Self::Step { step_id, .. } => Some(step_id),
      _ => None,
    }
  }

  /// Resolve against a scope of the shape
  /// `{ "blob": .., "provider": .., "event": .., "steps": { id: output } }`.
  pub fn resolve(&self, scope: &Value) -> Option<Value> {
    match self {
      Self::Blob(path) => scope.get("blob").and_then(|v| path.lookup(v)).cloned(),
      Self::Provider(path) => scope.get("provider").and_then(|v| path.lookup(v)).cloned(),
      Self::Event(path) => scope.get("event").and_then(|v| path.lookup(v)).cloned(),
      Self::Step { step_id, path } => scope
        .get("steps")
        .and_then(|steps| steps.get(step_id))
        .and_then(|output| path.lookup(output))
        .cloned(),
      Self::Literal(value) => Some(Value::String(value.clone())),
    }
  }
}

fn collect<'a>(segments: impl Iterator<Item = &'a str>) -> Vec<String> {
  segments.map(str::to_string).collect()
}

fn with_path(f: &mut fmt::Formatter<'_>, head: &str, path: &FieldPath) -> fmt::Result {
  if path.is_root() {
    write!(f, "{}{}", PREFIX, head)
  } else {
    write!(f, "{}{}.{}", PREFIX, head, path)
  }
}

impl fmt::Display for ValueRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Blob(path) => with_path(f, "blob", path),
      Self::Provider(path) => with_path(f, "provider", path),
      Self::Event(path) => with_path(f, "event", path),
      Self::Step { step_id, path } => with_path(f, &format!("steps.{}.output", step_id), path),
      Self::Literal(value) => write!(f, "{}", value),
    }
  }
}

impl TryFrom<String> for ValueRef {
  type Error = WorkflowError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<ValueRef> for String {
  fn from(value: ValueRef) -> Self {
    value.to_string()
  }
}
