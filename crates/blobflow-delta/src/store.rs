//! Delta persistence and application.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::apply::{self, Undo, WriteMode};
use crate::delta::{Delta, paths_overlap};
use crate::error::DeltaError;
use crate::policy::{ConflictResolution, DeltaPolicy, RollbackPolicy, RollbackStrategy, SchemaValidator};

/// Current data of a blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlobState {
  pub blob_id: String,
  pub data: Value,
  /// Highest sequence currently applied, 0 when nothing has been applied.
  pub head_sequence: u64,
}

/// Outcome of a successful `apply_deltas` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ApplyReport {
  pub blob_id: String,
  pub applied: Vec<Delta>,
  /// Deltas dropped by last-write-wins because a newer write already landed.
  pub skipped: Vec<Delta>,
  pub head_sequence: u64,
}

/// A failed batch awaiting deferred compensation.
#[derive(Debug, Clone)]
pub struct PendingRollback {
  pub blob_id: String,
  pub delta_ids: Vec<String>,
  pub reason: String,
  entries: Vec<AppliedEntry>,
  policy: RollbackPolicy,
}

/// A failed batch left for an operator to resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedBatch {
  pub blob_id: String,
  pub delta_ids: Vec<String>,
  pub reason: String,
  pub flagged_at: DateTime<Utc>,
}

/// Storage for deltas and the blob state they produce.
#[async_trait]
pub trait DeltaStore: Send + Sync {
  /// Persist a delta, assigning the next sequence number for its blob.
  async fn store(&self, delta: Delta) -> Result<Delta, DeltaError>;

  /// Every stored delta of a blob, ordered by sequence.
  async fn get_by_blob_id(&self, blob_id: &str) -> Result<Vec<Delta>, DeltaError>;

  /// Apply one execution's deltas to a blob as a batch.
  async fn apply_deltas(
    &self,
    blob_id: &str,
    deltas: Vec<Delta>,
    policy: &DeltaPolicy,
  ) -> Result<ApplyReport, DeltaError>;

  async fn blob_state(&self, blob_id: &str) -> Result<Option<BlobState>, DeltaError>;
}

#[derive(Debug, Clone)]
struct AppliedEntry {
  delta: Delta,
  undo: Undo,
}

#[derive(Debug, Default)]
struct BlobEntry {
  data: Value,
  next_sequence: u64,
  history: Vec<Delta>,
  applied: Vec<Delta>,
}

impl BlobEntry {
  fn head_sequence(&self) -> u64 {
    self.applied.iter().map(|d| d.sequence).max().unwrap_or(0)
  }

  fn stamp(&mut self, mut delta: Delta) -> Delta {
    self.next_sequence += 1;
    delta.sequence = self.next_sequence;
    self.history.push(delta.clone());
    delta
  }

  /// The newest delta applied before this batch that races `delta`.
  fn conflicting(&self, delta: &Delta, before: usize) -> Option<&Delta> {
    self.applied[..before]
      .iter()
      .filter(|applied| applied.sequence > delta.base_sequence)
      .filter(|applied| paths_overlap(&applied.path, &delta.path))
      .max_by_key(|applied| applied.sequence)
  }
}

/// In-memory [`DeltaStore`].
///
/// Every blob has its own lock, so batches for different blobs apply in
/// parallel while batches for one blob are serialized.
#[derive(Default)]
pub struct MemoryDeltaStore {
  blobs: Mutex<BTreeMap<String, Arc<Mutex<BlobEntry>>>>,
  schema_validator: Option<Arc<dyn SchemaValidator>>,
  deferred: Mutex<Vec<PendingRollback>>,
  flagged: Mutex<Vec<FlaggedBatch>>,
}

impl MemoryDeltaStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
    self.schema_validator = Some(validator);
    self
  }

  /// Set the initial data of a blob.
  pub async fn seed(&self, blob_id: &str, data: Value) {
    let entry = self.entry(blob_id).await;
    entry.lock().await.data = data;
  }

  async fn entry(&self, blob_id: &str) -> Arc<Mutex<BlobEntry>> {
    let mut blobs = self.blobs.lock().await;
    blobs.entry(blob_id.to_string()).or_default().clone()
  }

  async fn existing(&self, blob_id: &str) -> Option<Arc<Mutex<BlobEntry>>> {
    self.blobs.lock().await.get(blob_id).cloned()
  }

  /// Batches waiting for [`MemoryDeltaStore::run_deferred_rollbacks`].
  pub async fn pending_rollbacks(&self) -> Vec<PendingRollback> {
    self.deferred.lock().await.clone()
  }

  /// Batches that need operator intervention.
  pub async fn flagged_batches(&self) -> Vec<FlaggedBatch> {
    self.flagged.lock().await.clone()
  }

  /// Compensate every queued batch. Returns how many deltas were reverted.
  ///
  /// Batches that cannot be fully compensated stay queued.
  pub async fn run_deferred_rollbacks(&self) -> Result<usize, DeltaError> {
    let queued = std::mem::take(&mut *self.deferred.lock().await);
    let mut reverted = 0;
    let mut first_error = None;

    for pending in queued {
      let entry = self.entry(&pending.blob_id).await;
      let mut blob = entry.lock().await;
      match revert(&mut blob, &pending.blob_id, &pending.entries, &pending.policy) {
        Ok(count) => {
          info!(blob_id = %pending.blob_id, reverted = count, "deferred_rollback_completed");
          reverted += count;
        }
        Err(e) => {
          warn!(blob_id = %pending.blob_id, error = %e, "deferred_rollback_failed");
          self.deferred.lock().await.push(pending);
          first_error.get_or_insert(e);
        }
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(reverted),
    }
  }

  async fn handle_failure(
    &self,
    blob: &mut BlobEntry,
    blob_id: &str,
    entries: Vec<AppliedEntry>,
    policy: &RollbackPolicy,
    cause: DeltaError,
  ) -> DeltaError {
    if entries.is_empty() || !policy.enabled {
      return cause;
    }

    let delta_ids = entries.iter().map(|e| e.delta.delta_id.clone()).collect();
    match policy.strategy {
      RollbackStrategy::Immediate => match revert(blob, blob_id, &entries, policy) {
        Ok(count) => {
          info!(blob_id = %blob_id, reverted = count, "batch_rolled_back");
          DeltaError::RolledBack {
            blob_id: blob_id.to_string(),
            reverted: count,
            cause: Box::new(cause),
          }
        }
        Err(DeltaError::Rollback {
          reverted,
          pending,
          message,
          ..
        }) => DeltaError::Rollback {
          blob_id: blob_id.to_string(),
          reverted,
          pending,
          message,
          cause: Box::new(cause),
        },
        Err(other) => other,
      },
      RollbackStrategy::Deferred => {
        info!(blob_id = %blob_id, deltas = entries.len(), "rollback_deferred");
        self.deferred.lock().await.push(PendingRollback {
          blob_id: blob_id.to_string(),
          delta_ids,
          reason: cause.to_string(),
          entries,
          policy: policy.clone(),
        });
        cause
      }
      RollbackStrategy::Manual => {
        warn!(blob_id = %blob_id, deltas = entries.len(), "batch_flagged_for_manual_rollback");
        self.flagged.lock().await.push(FlaggedBatch {
          blob_id: blob_id.to_string(),
          delta_ids,
          reason: cause.to_string(),
          flagged_at: Utc::now(),
        });
        cause
      }
    }
  }
}

/// Revert `entries` newest first, within the policy's depth.
fn revert(
  blob: &mut BlobEntry,
  blob_id: &str,
  entries: &[AppliedEntry],
  policy: &RollbackPolicy,
) -> Result<usize, DeltaError> {
  let allowed = policy.revertible(entries.len());
  let mut reverted = 0;

  for entry in entries.iter().rev().take(allowed) {
    let pending = entries.len() - reverted;
    if policy.compensation_for(entry.delta.delta_type).is_none() {
      return Err(rollback_error(
        blob_id,
        reverted,
        pending,
        format!("no compensation configured for {}", entry.delta.delta_type),
      ));
    }

    apply::compensate(&mut blob.data, &entry.undo)
      .map_err(|message| rollback_error(blob_id, reverted, pending, message))?;

    blob.applied.retain(|d| d.delta_id != entry.delta.delta_id);
    reverted += 1;
  }

  if reverted < entries.len() {
    return Err(rollback_error(
      blob_id,
      reverted,
      entries.len() - reverted,
      format!("max rollback depth {} exceeded", policy.max_rollback_depth),
    ));
  }

  Ok(reverted)
}

fn rollback_error(blob_id: &str, reverted: usize, pending: usize, message: String) -> DeltaError {
  DeltaError::Rollback {
    blob_id: blob_id.to_string(),
    reverted,
    pending,
    cause: Box::new(DeltaError::InvalidDelta {
      message: message.clone(),
    }),
    message,
  }
}

#[async_trait]
impl DeltaStore for MemoryDeltaStore {
  async fn store(&self, delta: Delta) -> Result<Delta, DeltaError> {
    let entry = self.entry(&delta.blob_id).await;
    let stamped = entry.lock().await.stamp(delta);
    debug!(blob_id = %stamped.blob_id, sequence = stamped.sequence, "delta_stored");
    Ok(stamped)
  }

  async fn get_by_blob_id(&self, blob_id: &str) -> Result<Vec<Delta>, DeltaError> {
    let Some(entry) = self.existing(blob_id).await else {
      return Ok(Vec::new());
    };
    let mut history = entry.lock().await.history.clone();
    history.sort_by_key(|d| d.sequence);
    Ok(history)
  }

  async fn apply_deltas(
    &self,
    blob_id: &str,
    deltas: Vec<Delta>,
    policy: &DeltaPolicy,
  ) -> Result<ApplyReport, DeltaError> {
    if let Some(foreign) = deltas.iter().find(|d| d.blob_id != blob_id) {
      return Err(DeltaError::InvalidDelta {
        message: format!(
          "delta {} targets blob '{}', not '{}'",
          foreign.delta_id, foreign.blob_id, blob_id
        ),
      });
    }

    for delta in &deltas {
      policy
        .validation
        .validate(delta, self.schema_validator.as_deref())?;
    }

    let entry = self.entry(blob_id).await;
    let mut blob = entry.lock().await;
    let batch_start = blob.applied.len();
    let mut report = ApplyReport {
      blob_id: blob_id.to_string(),
      ..Default::default()
    };
    let mut entries = Vec::new();

    for delta in deltas {
      let delta = if delta.sequence == 0 {
        blob.stamp(delta)
      } else {
        delta
      };

      let mut mode = WriteMode::Plain;
      if let Some(applied) = blob.conflicting(&delta, batch_start) {
        let applied_sequence = applied.sequence;
        match policy.validation.conflict_resolution {
          ConflictResolution::Fail => {
            warn!(
              blob_id = %blob_id,
              path = %delta.path,
              sequence = delta.sequence,
              conflicting_sequence = applied_sequence,
              "delta_conflict"
            );
            let cause = DeltaError::Conflict {
              blob_id: blob_id.to_string(),
              path: delta.path.clone(),
              sequence: delta.sequence,
              conflicting_sequence: applied_sequence,
            };
            return Err(
              self
                .handle_failure(&mut blob, blob_id, entries, &policy.rollback, cause)
                .await,
            );
          }
          ConflictResolution::LastWriteWins if delta.sequence < applied_sequence => {
            debug!(blob_id = %blob_id, sequence = delta.sequence, "delta_superseded");
            report.skipped.push(delta);
            continue;
          }
          ConflictResolution::Merge => {
            let both_objects = delta.new_value.as_ref().is_some_and(Value::is_object)
              && apply::get(&blob.data, &delta.tokens()).is_some_and(Value::is_object);
            if both_objects {
              mode = WriteMode::Merge;
            } else if delta.sequence < applied_sequence {
              report.skipped.push(delta);
              continue;
            }
          }
          ConflictResolution::LastWriteWins => {}
        }
      }

      match apply::apply_mutation(&mut blob.data, &delta, mode) {
        Ok(undo) => {
          blob.applied.push(delta.clone());
          entries.push(AppliedEntry {
            delta: delta.clone(),
            undo,
          });
          report.applied.push(delta);
        }
        Err(message) => {
          let cause = DeltaError::Apply {
            blob_id: blob_id.to_string(),
            delta_id: delta.delta_id.clone(),
            path: delta.path.clone(),
            message,
          };
          return Err(
            self
              .handle_failure(&mut blob, blob_id, entries, &policy.rollback, cause)
              .await,
          );
        }
      }
    }

    report.head_sequence = blob.head_sequence();
    info!(
      blob_id = %blob_id,
      applied = report.applied.len(),
      skipped = report.skipped.len(),
      head_sequence = report.head_sequence,
      "deltas_applied"
    );
    Ok(report)
  }

  async fn blob_state(&self, blob_id: &str) -> Result<Option<BlobState>, DeltaError> {
    let Some(entry) = self.existing(blob_id).await else {
      return Ok(None);
    };
    let blob = entry.lock().await;
    Ok(Some(BlobState {
      blob_id: blob_id.to_string(),
      data: blob.data.clone(),
      head_sequence: blob.head_sequence(),
    }))
  }
}
