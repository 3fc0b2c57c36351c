//! Event processing.
//!
//! For every blob lifecycle event the orchestrator asks the registry which
//! providers fire, runs their workflows through the execution backend and
//! applies the resulting deltas to the blob:
//!
//! ```text
//! event ─► registry.matching ─┬─► sync providers, serially by id ──┐
//!                             └─► async providers, one task each ──┤
//!                                                                  ▼
//!        backend.execute_workflow ─► poll until terminal ─► extract_deltas
//!                                                                  │
//!        publish delta.applied / workflow.completed ◄─ apply_deltas ◄┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use blobflow_backend::{
  BackendError, ExecuteRequest, ExecutionBackend, ExecutionContext, ExecutionFailure, ExecutionInput,
  ExecutionResponse, ExecutionStatus,
};
use blobflow_delta::{DeltaError, DeltaStore, extract_deltas};
use blobflow_provider::{
  DELTA_APPLIED, Event, Provider, ProviderRegistry, RegistryError, TriggerMatch, WORKFLOW_COMPLETED,
};
use serde_json::{Map, Value, json};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::events::EventBus;
use crate::report::{DispatchMode, DispatchPhase, ExecutionSummary, ProcessReport, ProviderOutcome};

struct Inner {
  registry: Arc<ProviderRegistry>,
  backend: Arc<dyn ExecutionBackend>,
  store: Arc<dyn DeltaStore>,
  events: Arc<dyn EventBus>,
  config: OrchestratorConfig,
  /// Per-provider `max_concurrent_jobs` limits.
  limits: RwLock<HashMap<String, Arc<Semaphore>>>,
  shutdown: CancellationToken,
}

/// Coordinates providers, the execution backend and the delta store.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
  inner: Arc<Inner>,
}

impl Orchestrator {
  pub fn new(
    registry: Arc<ProviderRegistry>,
    backend: Arc<dyn ExecutionBackend>,
    store: Arc<dyn DeltaStore>,
    events: Arc<dyn EventBus>,
    config: OrchestratorConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        registry,
        backend,
        store,
        events,
        config,
        limits: RwLock::new(HashMap::new()),
        shutdown: CancellationToken::new(),
      }),
    }
  }

  pub fn registry(&self) -> &ProviderRegistry {
    &self.inner.registry
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.inner.config
  }

  /// Cancel all in-flight and future dispatches.
  pub fn shutdown(&self) {
    self.inner.shutdown.cancel();
  }

  /// Register a provider, resolving its workflows from the backend.
  ///
  /// Workflows already known to the registry are not fetched again. Every
  /// workflow graph is validated before the provider is recorded.
  #[instrument(name = "register_provider", skip(self, provider), fields(provider_id = %provider.provider_id))]
  pub async fn register_provider(&self, provider: Provider) -> Result<(), OrchestratorError> {
    let registry = &self.inner.registry;
    if registry.contains(&provider.provider_id).await {
      return Err(
        RegistryError::DuplicateProvider {
          provider_id: provider.provider_id,
        }
        .into(),
      );
    }

    let mut workflows = Vec::with_capacity(provider.workflow_ids.len());
    for workflow_id in &provider.workflow_ids {
      if let Some(workflow) = registry.get_workflow(workflow_id).await {
        workflows.push(workflow);
        continue;
      }
      let workflow = self
        .inner
        .backend
        .get_workflow(workflow_id)
        .await
        .map_err(|source| OrchestratorError::Dispatch {
          provider_id: provider.provider_id.clone(),
          workflow_id: workflow_id.clone(),
          source,
        })?;
      debug!(workflow_id = %workflow_id, steps = workflow.steps.len(), "workflow_resolved");
      workflows.push(workflow);
    }

    let provider_id = provider.provider_id.clone();
    let max_jobs = provider.config.max_concurrent_jobs;
    registry.register(provider, workflows).await?;

    if max_jobs > 0 {
      self
        .inner
        .limits
        .write()
        .await
        .insert(provider_id, Arc::new(Semaphore::new(max_jobs as usize)));
    }
    Ok(())
  }

  /// Process a lifecycle event for `blob_id` raised by `user_id`.
  pub async fn process_blob(
    &self,
    blob_id: &str,
    user_id: &str,
    event_type: &str,
  ) -> Result<ProcessReport, OrchestratorError> {
    self.process_event(Event::new(event_type, blob_id, user_id)).await
  }

  /// Dispatch every provider `event` triggers.
  ///
  /// Synchronous providers run one after another on this task; the first
  /// failure cancels the asynchronous ones, waits for them and is returned.
  /// Asynchronous failures are collected into
  /// [`OrchestratorError::Aggregate`] once every task has finished.
  #[instrument(
    name = "process_event",
    skip(self, event),
    fields(
      event_id = %event.event_id,
      event_type = %event.event_type,
      blob_id = %event.blob_id,
    )
  )]
  pub async fn process_event(&self, event: Event) -> Result<ProcessReport, OrchestratorError> {
    let matches = self.inner.registry.matching(&event).await;
    let mut report = ProcessReport {
      event_id: event.event_id.clone(),
      event_type: event.event_type.clone(),
      blob_id: event.blob_id.clone(),
      outcomes: Vec::new(),
    };

    if matches.is_empty() {
      debug!("no_provider_matched");
      return Ok(report);
    }

    let (async_matches, sync_matches): (Vec<_>, Vec<_>) = matches.into_iter().partition(|m| m.trigger.is_async);
    info!(
      sync = sync_matches.len(),
      async_ = async_matches.len(),
      "trigger_matched"
    );

    let cancel = self.inner.shutdown.child_token();
    let event = Arc::new(event);
    let mut tasks = JoinSet::new();

    for matched in async_matches {
      let this = self.clone();
      let event = event.clone();
      let cancel = cancel.clone();
      tasks.spawn(async move { this.dispatch(matched, &event, &cancel).await });
    }

    for matched in sync_matches {
      match self.dispatch(matched, &event, &cancel).await {
        Ok(outcome) => report.outcomes.push(outcome),
        Err(e) => {
          cancel.cancel();
          while tasks.join_next().await.is_some() {}
          return Err(e);
        }
      }
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(Ok(outcome)) => report.outcomes.push(outcome),
        Ok(Err(e)) => failures.push(e),
        Err(e) => failures.push(OrchestratorError::Join {
          message: e.to_string(),
        }),
      }
    }

    if !failures.is_empty() {
      error!(failed = failures.len(), "async_providers_failed");
      return Err(OrchestratorError::Aggregate { failures });
    }

    report.outcomes.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
    info!(providers = report.outcomes.len(), applied = report.applied(), "event_processed");
    Ok(report)
  }

  /// Provider id -> providers its workflows depend on.
  pub async fn provider_dag(&self) -> BTreeMap<String, BTreeSet<String>> {
    self.inner.registry.provider_dag().await
  }

  /// Providers grouped into dependency levels.
  pub async fn provider_order(&self) -> Result<Vec<Vec<String>>, OrchestratorError> {
    Ok(self.inner.registry.provider_order().await?)
  }

  #[instrument(
    name = "dispatch_provider",
    skip_all,
    fields(provider_id = %matched.provider.provider_id, is_async = matched.trigger.is_async)
  )]
  async fn dispatch(
    &self,
    matched: TriggerMatch,
    event: &Event,
    cancel: &CancellationToken,
  ) -> Result<ProviderOutcome, OrchestratorError> {
    let provider_id = matched.provider.provider_id.clone();
    let limit = self.inner.limits.read().await.get(&provider_id).cloned();
    let _permit = match limit {
      Some(limit) => tokio::select! {
        permit = limit.acquire_owned() => permit.ok(),
        _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
      },
      None => None,
    };

    let mut outcome = ProviderOutcome {
      provider_id: provider_id.clone(),
      mode: if matched.trigger.is_async {
        DispatchMode::Async
      } else {
        DispatchMode::Sync
      },
      phase: DispatchPhase::TriggerMatched,
      failed_at: None,
      executions: Vec::new(),
    };
    let mut in_flight = None;

    let run = self.run_provider(&matched, event, cancel, &mut outcome, &mut in_flight);
    let result = match self.inner.config.dispatch_timeout(matched.provider.config.timeout()) {
      Some(limit) => tokio::time::timeout(limit, run)
        .await
        .unwrap_or_else(|_| {
          Err(OrchestratorError::Timeout {
            provider_id: provider_id.clone(),
            limit,
          })
        }),
      None => run.await,
    };

    match result {
      Ok(()) => {
        outcome.phase = DispatchPhase::EventPublished;
        info!(
          executions = outcome.executions.len(),
          applied = outcome.applied(),
          "provider_completed"
        );
        Ok(outcome)
      }
      Err(e) => {
        if let Some(execution_id) = in_flight {
          self.cancel_remote(&execution_id).await;
        }
        let reached = outcome.phase;
        outcome.failed_at = Some(reached);
        outcome.phase = match &e {
          OrchestratorError::Delta { source, .. } if source.is_rolled_back() => DispatchPhase::RolledBack,
          _ => DispatchPhase::Failed,
        };
        error!(reached = %reached, phase = %outcome.phase, error = %e, "provider_failed");
        Err(OrchestratorError::Provider {
          outcome: Box::new(outcome),
          source: Box::new(e),
        })
      }
    }
  }

  /// Run every workflow of a provider in order. `in_flight` holds the id
  /// of an execution the backend has accepted but not finished.
  async fn run_provider(
    &self,
    matched: &TriggerMatch,
    event: &Event,
    cancel: &CancellationToken,
    outcome: &mut ProviderOutcome,
    in_flight: &mut Option<String>,
  ) -> Result<(), OrchestratorError> {
    let provider = &matched.provider;
    let provider_id = provider.provider_id.as_str();
    let delta_error = |source: DeltaError| OrchestratorError::Delta {
      provider_id: provider_id.to_string(),
      source,
    };

    for workflow_id in &provider.workflow_ids {
      if cancel.is_cancelled() {
        return Err(OrchestratorError::Cancelled);
      }
      outcome.phase = DispatchPhase::Dispatching;

      let (blob, base_sequence) = match self.inner.store.blob_state(&event.blob_id).await.map_err(delta_error)? {
        Some(state) => (state.data, state.head_sequence),
        None => (Value::Null, 0),
      };
      let request = execute_request(matched, workflow_id, event, blob, base_sequence);
      info!(workflow_id = %workflow_id, base_sequence = base_sequence, "workflow_dispatched");

      let dispatch_error = |source: BackendError| OrchestratorError::Dispatch {
        provider_id: provider_id.to_string(),
        workflow_id: workflow_id.clone(),
        source,
      };
      let response = tokio::select! {
        response = self.inner.backend.execute_workflow(request) => response.map_err(dispatch_error)?,
        _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
      };

      outcome.phase = DispatchPhase::Executing;
      *in_flight = Some(response.execution_id.clone());
      let response = self.await_terminal(response, cancel).await.map_err(|e| match e {
        PollError::Cancelled => OrchestratorError::Cancelled,
        PollError::Backend(source) => dispatch_error(source),
      })?;
      *in_flight = None;

      let execution_id = response.execution_id.clone();
      let output = match response.status {
        ExecutionStatus::Completed => response.output.unwrap_or(Value::Null),
        status => {
          let failure = response.error.unwrap_or_else(|| {
            ExecutionFailure::new(status.to_string().to_uppercase(), "execution did not complete")
          });
          return Err(OrchestratorError::Execution {
            provider_id: provider_id.to_string(),
            workflow_id: workflow_id.clone(),
            execution_id,
            failure,
          });
        }
      };

      outcome.phase = DispatchPhase::DeltaExtraction;
      let deltas = extract_deltas(&event.blob_id, provider_id, &output).map_err(delta_error)?;
      let mut stored = Vec::with_capacity(deltas.len());
      for delta in deltas {
        let delta = self
          .inner
          .store
          .store(delta.with_base_sequence(base_sequence))
          .await
          .map_err(delta_error)?;
        stored.push(delta);
      }

      outcome.phase = DispatchPhase::DeltaApplication;
      let mut summary = ExecutionSummary {
        workflow_id: workflow_id.clone(),
        execution_id: execution_id.clone(),
        applied: 0,
        skipped: 0,
        head_sequence: base_sequence,
      };

      if !stored.is_empty() {
        let report = self
          .inner
          .store
          .apply_deltas(&event.blob_id, stored, &provider.config.delta_policy())
          .await
          .map_err(delta_error)?;
        info!(
          workflow_id = %workflow_id,
          applied = report.applied.len(),
          skipped = report.skipped.len(),
          head_sequence = report.head_sequence,
          "deltas_applied"
        );

        for delta in &report.applied {
          let applied = Event::new(DELTA_APPLIED, &event.blob_id, &event.user_id)
            .from_provider(provider_id)
            .with_data("delta", serde_json::to_value(delta).unwrap_or(Value::Null))
            .with_data("workflow_id", json!(workflow_id))
            .with_data("execution_id", json!(execution_id))
            .with_data("trigger_event_id", json!(event.event_id));
          self.publish(applied).await;
        }

        summary.applied = report.applied.len();
        summary.skipped = report.skipped.len();
        summary.head_sequence = report.head_sequence;
      }

      let completed = Event::new(WORKFLOW_COMPLETED, &event.blob_id, &event.user_id)
        .from_provider(provider_id)
        .with_data("workflow_id", json!(workflow_id))
        .with_data("execution_id", json!(execution_id))
        .with_data("applied", json!(summary.applied))
        .with_data("skipped", json!(summary.skipped))
        .with_data("trigger_event_id", json!(event.event_id));
      self.publish(completed).await;

      outcome.executions.push(summary);
    }

    Ok(())
  }

  /// Poll a non-terminal execution until it finishes. Cancelling asks the
  /// backend to cancel the execution.
  async fn await_terminal(
    &self,
    mut response: ExecutionResponse,
    cancel: &CancellationToken,
  ) -> Result<ExecutionResponse, PollError> {
    let interval = self.inner.config.poll_interval();
    while !response.status.is_terminal() {
      tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = cancel.cancelled() => return Err(PollError::Cancelled),
      }
      response = self
        .inner
        .backend
        .get_execution_status(&response.execution_id)
        .await
        .map_err(PollError::Backend)?;
      debug!(execution_id = %response.execution_id, status = %response.status, "execution_polled");
    }
    Ok(response)
  }

  async fn cancel_remote(&self, execution_id: &str) {
    match self.inner.backend.cancel_execution(execution_id).await {
      Ok(()) => info!(execution_id = %execution_id, "execution_cancelled"),
      Err(e) => warn!(execution_id = %execution_id, error = %e, "execution_cancel_failed"),
    }
  }

  async fn publish(&self, event: Event) {
    let event_type = event.event_type.clone();
    if let Err(e) = self.inner.events.publish(event).await {
      warn!(event_type = %event_type, error = %e, "event_publish_failed");
    }
  }
}

enum PollError {
  Cancelled,
  Backend(BackendError),
}

fn execute_request(
  matched: &TriggerMatch,
  workflow_id: &str,
  event: &Event,
  blob: Value,
  base_sequence: u64,
) -> ExecuteRequest {
  let config = &matched.provider.config;
  let metadata = match event.context() {
    Value::Object(map) => map,
    _ => Map::new(),
  };

  ExecuteRequest {
    workflow_id: workflow_id.to_string(),
    input: ExecutionInput {
      blob_id: event.blob_id.clone(),
      user_id: event.user_id.clone(),
      provider_id: matched.provider.provider_id.clone(),
      parameters: config.parameters.clone(),
      event: metadata,
      blob,
    },
    context: ExecutionContext {
      request_id: Uuid::new_v4().to_string(),
      event_id: event.event_id.clone(),
      event_type: event.event_type.clone(),
      base_sequence,
      timeout_seconds: config.timeout_seconds,
      rate_limit: config.rate_limit,
      max_concurrent_jobs: config.max_concurrent_jobs,
      retry_policy: Some(config.retry_policy.clone()),
    },
    priority: matched.trigger.priority,
    is_async: matched.trigger.is_async,
  }
}
