//! Delta errors.

/// Errors raised while extracting, validating or applying deltas.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
  /// Workflow output or a delta entry could not be interpreted.
  #[error("invalid delta: {message}")]
  InvalidDelta { message: String },

  /// A validation rule with error severity did not hold.
  #[error("delta {delta_id} failed validation rule '{rule}': {message}")]
  Validation {
    delta_id: String,
    rule: String,
    message: String,
  },

  /// A concurrently sequenced delta already wrote an overlapping path.
  #[error(
    "conflict on blob '{blob_id}' at '{path}': delta #{sequence} raced applied delta #{conflicting_sequence}"
  )]
  Conflict {
    blob_id: String,
    path: String,
    sequence: u64,
    conflicting_sequence: u64,
  },

  /// The mutation itself could not be performed on the blob's data.
  #[error("failed to apply delta {delta_id} to blob '{blob_id}' at '{path}': {message}")]
  Apply {
    blob_id: String,
    delta_id: String,
    path: String,
    message: String,
  },

  /// The batch failed and every delta it had applied was reverted.
  #[error("batch on blob '{blob_id}' rolled back ({reverted} reverted): {cause}")]
  RolledBack {
    blob_id: String,
    reverted: usize,
    #[source]
    cause: Box<DeltaError>,
  },

  /// Compensation of a failed batch could not be completed.
  #[error("rollback on blob '{blob_id}' incomplete ({reverted} reverted, {pending} pending): {message}")]
  Rollback {
    blob_id: String,
    reverted: usize,
    pending: usize,
    message: String,
    #[source]
    cause: Box<DeltaError>,
  },
}

impl DeltaError {
  pub fn is_conflict(&self) -> bool {
    match self {
      Self::Conflict { .. } => true,
      Self::Rollback { cause, .. } | Self::RolledBack { cause, .. } => cause.is_conflict(),
      _ => false,
    }
  }

  /// Whether the store reverted the failed batch's applied deltas.
  pub fn is_rolled_back(&self) -> bool {
    matches!(self, Self::RolledBack { .. })
  }
}
