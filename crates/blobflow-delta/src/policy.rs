//! Validation, conflict-resolution and rollback policy.

use std::collections::BTreeMap;

use blobflow_workflow::Condition;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::delta::{Delta, DeltaType};
use crate::error::DeltaError;

/// How concurrently sequenced writes to overlapping paths are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
  /// The delta with the newest sequence number wins.
  #[default]
  LastWriteWins,
  /// Object values are deep-merged; anything else falls back to last-write-wins.
  Merge,
  /// Reject the apply with a conflict error.
  Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Info,
  #[default]
  Warning,
  Error,
}

/// A named predicate every delta is checked against.
///
/// The expression is evaluated against the delta's serialized form, so
/// rules address fields like `type`, `path`, `new_value.title` or
/// `metadata.source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
  pub name: String,
  pub expression: Condition,
  #[serde(default)]
  pub severity: Severity,
}

/// Checks a value against a registered schema.
///
/// Schema registries are external; implementations adapt one to the store.
pub trait SchemaValidator: Send + Sync {
  fn validate(&self, schema_id: &str, value: &serde_json::Value) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaValidation {
  pub schema_required: bool,
  pub schema_id: Option<String>,
  pub rules: Vec<ValidationRule>,
  pub conflict_resolution: ConflictResolution,
}

impl DeltaValidation {
  /// Check a delta against the schema requirement and custom rules.
  ///
  /// Only `error` severity rules reject; the others are logged.
  pub fn validate(
    &self,
    delta: &Delta,
    schema_validator: Option<&dyn SchemaValidator>,
  ) -> Result<(), DeltaError> {
    if self.schema_required {
      self.validate_schema(delta, schema_validator)?;
    }

    if self.rules.is_empty() {
      return Ok(());
    }

    let context = serde_json::to_value(delta).map_err(|e| DeltaError::InvalidDelta {
      message: format!("failed to serialize delta for validation: {}", e),
    })?;

    for rule in &self.rules {
      if rule.expression.evaluate(&context) {
        continue;
      }
      match rule.severity {
        Severity::Error => {
          return Err(DeltaError::Validation {
            delta_id: delta.delta_id.clone(),
            rule: rule.name.clone(),
            message: format!(
              "expected {} {:?} {}",
              rule.expression.field, rule.expression.operator, rule.expression.value
            ),
          });
        }
        Severity::Warning => {
          warn!(delta_id = %delta.delta_id, rule = %rule.name, "delta_rule_warning");
        }
        Severity::Info => {
          info!(delta_id = %delta.delta_id, rule = %rule.name, "delta_rule_info");
        }
      }
    }

    Ok(())
  }

  fn validate_schema(
    &self,
    delta: &Delta,
    schema_validator: Option<&dyn SchemaValidator>,
  ) -> Result<(), DeltaError> {
    let schema_id = self
      .schema_id
      .as_deref()
      .ok_or_else(|| DeltaError::Validation {
        delta_id: delta.delta_id.clone(),
        rule: "schema".to_string(),
        message: "schema validation required but no schema id configured".to_string(),
      })?;

    let Some(validator) = schema_validator else {
      warn!(
        delta_id = %delta.delta_id,
        schema_id = %schema_id,
        "no schema validator configured, skipping schema check"
      );
      return Ok(());
    };

    if delta.delta_type == DeltaType::Delete {
      return Ok(());
    }

    let value = delta.new_value.clone().unwrap_or(serde_json::Value::Null);
    validator
      .validate(schema_id, &value)
      .map_err(|message| DeltaError::Validation {
        delta_id: delta.delta_id.clone(),
        rule: format!("schema:{}", schema_id),
        message,
      })
  }
}

/// When compensation of a failed batch happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStrategy {
  /// Revert before the failing apply returns.
  #[default]
  Immediate,
  /// Queue compensation for a later `run_deferred_rollbacks`.
  Deferred,
  /// Only flag the batch for an operator.
  Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackPolicy {
  pub enabled: bool,
  /// How many applied deltas of a batch may be reverted. 0 means unlimited.
  pub max_rollback_depth: usize,
  pub strategy: RollbackStrategy,
  /// Delta types that may be compensated, with their compensating operation.
  pub compensations: BTreeMap<DeltaType, DeltaType>,
}

impl Default for RollbackPolicy {
  fn default() -> Self {
    Self {
      enabled: true,
      max_rollback_depth: 10,
      strategy: RollbackStrategy::Immediate,
      compensations: BTreeMap::from([
        (DeltaType::Create, DeltaType::Delete),
        (DeltaType::Update, DeltaType::Update),
        (DeltaType::Delete, DeltaType::Create),
        (DeltaType::Transform, DeltaType::Transform),
      ]),
    }
  }
}

impl RollbackPolicy {
  pub fn disabled() -> Self {
    Self {
      enabled: false,
      ..Self::default()
    }
  }

  pub fn compensation_for(&self, delta_type: DeltaType) -> Option<DeltaType> {
    self.compensations.get(&delta_type).copied()
  }

  /// Number of deltas that may be reverted out of `applied`.
  pub fn revertible(&self, applied: usize) -> usize {
    if self.max_rollback_depth == 0 {
      applied
    } else {
      applied.min(self.max_rollback_depth)
    }
  }
}

/// Everything the store needs to know to apply one batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaPolicy {
  pub validation: DeltaValidation,
  pub rollback: RollbackPolicy,
}
