//! Integration tests for Orchestrator against a scripted backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blobflow_backend::{
  BackendError, ExecuteRequest, ExecutionBackend, ExecutionFailure, ExecutionResponse, ExecutionStatus,
};
use blobflow_delta::{ConflictResolution, DeltaStore, MemoryDeltaStore, RollbackStrategy};
use blobflow_orchestrator::{
  ChannelEventBus, DispatchMode, DispatchPhase, EventBus, NoopEventBus, Orchestrator, OrchestratorConfig,
  OrchestratorError, PublishError,
};
use blobflow_provider::{
  DELTA_APPLIED, Event, Provider, ProviderConfig, ProviderRegistry, RegistryError, TriggerConfig,
  WORKFLOW_COMPLETED,
};
use blobflow_workflow::{Step, StepType, Workflow, WorkflowError};
use serde_json::{Value, json};
use tokio::sync::Barrier;

/// How the scripted backend answers an execution of a workflow.
#[derive(Clone)]
enum Script {
  Complete(Value),
  Fail(&'static str),
  /// Report `running`, then complete on the first status poll.
  Pending(Value),
  /// Wait before completing.
  Slow(Duration),
  /// Complete once every execution sharing the barrier has started.
  Gate(Arc<Barrier>, Value),
}

#[derive(Default)]
struct ScriptedBackend {
  workflows: BTreeMap<String, Workflow>,
  scripts: HashMap<String, Script>,
  requests: Mutex<Vec<ExecuteRequest>>,
  pending: Mutex<HashMap<String, Value>>,
  cancelled: Mutex<Vec<String>>,
}

impl ScriptedBackend {
  fn with(mut self, workflow: Workflow, script: Script) -> Self {
    self.scripts.insert(workflow.workflow_id.clone(), script);
    self.workflows.insert(workflow.workflow_id.clone(), workflow);
    self
  }

  fn requests(&self) -> Vec<ExecuteRequest> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
  async fn execute_workflow(&self, request: ExecuteRequest) -> Result<ExecutionResponse, BackendError> {
    let execution_id = format!("exec-{}-{}", request.workflow_id, request.input.provider_id);
    let script = self
      .scripts
      .get(&request.workflow_id)
      .cloned()
      .ok_or_else(|| BackendError::WorkflowNotFound {
        workflow_id: request.workflow_id.clone(),
      })?;
    self.requests.lock().unwrap().push(request);

    match script {
      Script::Complete(output) => Ok(ExecutionResponse::completed(execution_id, output)),
      Script::Fail(message) => Ok(ExecutionResponse::failed(
        execution_id,
        ExecutionFailure::new("STEP_FAILED", message).at_step("validate"),
      )),
      Script::Pending(output) => {
        self.pending.lock().unwrap().insert(execution_id.clone(), output);
        Ok(ExecutionResponse {
          execution_id,
          status: ExecutionStatus::Running,
          output: None,
          error: None,
        })
      }
      Script::Slow(delay) => {
        tokio::time::sleep(delay).await;
        Ok(ExecutionResponse::completed(execution_id, json!({})))
      }
      Script::Gate(barrier, output) => {
        barrier.wait().await;
        Ok(ExecutionResponse::completed(execution_id, output))
      }
    }
  }

  async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionResponse, BackendError> {
    let output = self.pending.lock().unwrap().remove(execution_id).ok_or_else(|| {
      BackendError::ExecutionNotFound {
        execution_id: execution_id.to_string(),
      }
    })?;
    Ok(ExecutionResponse::completed(execution_id, output))
  }

  async fn cancel_execution(&self, execution_id: &str) -> Result<(), BackendError> {
    self.cancelled.lock().unwrap().push(execution_id.to_string());
    Ok(())
  }

  async fn register_workflow(&self, _workflow: &Workflow) -> Result<(), BackendError> {
    Ok(())
  }

  async fn update_workflow(&self, _workflow: &Workflow) -> Result<(), BackendError> {
    Ok(())
  }

  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, BackendError> {
    self
      .workflows
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| BackendError::WorkflowNotFound {
        workflow_id: workflow_id.to_string(),
      })
  }

  async fn list_workflows(&self, provider_id: &str) -> Result<Vec<Workflow>, BackendError> {
    Ok(
      self
        .workflows
        .values()
        .filter(|w| w.provider_id == provider_id)
        .cloned()
        .collect(),
    )
  }
}

fn workflow(id: &str, owner: &str) -> Workflow {
  Workflow::new(id, owner, id).with_step(Step::new("validate", StepType::Validate))
}

fn provider(id: &str, workflow_id: &str, trigger: TriggerConfig) -> Provider {
  Provider::new(id, id).with_workflow(workflow_id).with_trigger(trigger)
}

fn fast_config() -> OrchestratorConfig {
  OrchestratorConfig {
    poll_interval_ms: 1,
    ..OrchestratorConfig::default()
  }
}

fn orchestrator(backend: Arc<ScriptedBackend>, store: Arc<MemoryDeltaStore>) -> Orchestrator {
  Orchestrator::new(
    Arc::new(ProviderRegistry::new()),
    backend,
    store,
    Arc::new(NoopEventBus),
    fast_config(),
  )
}

fn title_delta(value: &str) -> Value {
  json!({ "deltas": [{ "type": "update", "path": "/title", "new_value": value }] })
}

#[tokio::test]
async fn test_sync_on_create_publishes_one_event_per_delta() {
  let backend = Arc::new(ScriptedBackend::default().with(
    workflow("summarize", "summarizer"),
    Script::Complete(json!({
      "deltas": [
        { "type": "update", "path": "/summary", "new_value": "short" },
        { "type": "update", "path": "/stats/words", "new_value": 2 }
      ]
    })),
  ));
  let store = Arc::new(MemoryDeltaStore::new());
  let (bus, mut events) = ChannelEventBus::channel();
  let orchestrator = Orchestrator::new(
    Arc::new(ProviderRegistry::new()),
    backend.clone(),
    store.clone(),
    Arc::new(bus),
    fast_config(),
  );
  orchestrator
    .register_provider(provider("summarizer", "summarize", TriggerConfig::new("onCreate")))
    .await
    .unwrap();

  let report = orchestrator.process_blob("blob-1", "user1", "onCreate").await.unwrap();

  let outcome = report.outcome("summarizer").unwrap();
  assert_eq!(outcome.mode, DispatchMode::Sync);
  assert_eq!(outcome.phase, DispatchPhase::EventPublished);
  assert_eq!(report.applied(), 2);

  let mut published = Vec::new();
  while let Ok(event) = events.try_recv() {
    published.push(event);
  }
  let applied: Vec<_> = published.iter().filter(|e| e.event_type == DELTA_APPLIED).collect();
  assert_eq!(applied.len(), 2);
  assert!(applied.iter().all(|e| e.originated_by("summarizer")));
  assert_eq!(
    published.iter().filter(|e| e.event_type == WORKFLOW_COMPLETED).count(),
    1
  );

  let state = store.blob_state("blob-1").await.unwrap().unwrap();
  assert_eq!(state.data, json!({ "summary": "short", "stats": { "words": 2 } }));

  let requests = backend.requests();
  assert_eq!(requests.len(), 1);
  assert_eq!(requests[0].input.user_id, "user1");
  assert_eq!(requests[0].context.event_type, "onCreate");
}

#[tokio::test]
async fn test_output_without_deltas_becomes_root_transform() {
  let backend = Arc::new(
    ScriptedBackend::default().with(workflow("score", "scorer"), Script::Complete(json!({ "result": 42 }))),
  );
  let store = Arc::new(MemoryDeltaStore::new());
  let orchestrator = orchestrator(backend, store.clone());
  orchestrator
    .register_provider(provider("scorer", "score", TriggerConfig::new("onCreate")))
    .await
    .unwrap();

  orchestrator.process_blob("blob-1", "user1", "onCreate").await.unwrap();

  let history = store.get_by_blob_id("blob-1").await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].path, "/");
  assert_eq!(history[0].new_value, Some(json!({ "result": 42 })));
}

#[tokio::test]
async fn test_provider_ignores_events_it_originated() {
  let backend = Arc::new(
    ScriptedBackend::default()
      .with(workflow("summarize", "summarizer"), Script::Complete(json!({})))
      .with(workflow("index", "indexer"), Script::Complete(json!({}))),
  );
  let orchestrator = orchestrator(backend.clone(), Arc::new(MemoryDeltaStore::new()));
  orchestrator
    .register_provider(provider("summarizer", "summarize", TriggerConfig::new(DELTA_APPLIED)))
    .await
    .unwrap();
  orchestrator
    .register_provider(provider("indexer", "index", TriggerConfig::new(DELTA_APPLIED)))
    .await
    .unwrap();

  let event = Event::new(DELTA_APPLIED, "blob-1", "user1").from_provider("summarizer");
  let report = orchestrator.process_event(event).await.unwrap();

  let ran: Vec<_> = report.outcomes.iter().map(|o| o.provider_id.as_str()).collect();
  assert_eq!(ran, vec!["indexer"]);
  assert!(backend.requests().iter().all(|r| r.input.provider_id != "summarizer"));
}

#[tokio::test]
async fn test_async_failures_are_aggregated() {
  let backend = Arc::new(
    ScriptedBackend::default()
      .with(workflow("ok", "fine"), Script::Complete(json!({})))
      .with(workflow("bad-1", "broken-1"), Script::Fail("boom"))
      .with(workflow("bad-2", "broken-2"), Script::Fail("bang")),
  );
  let orchestrator = orchestrator(backend.clone(), Arc::new(MemoryDeltaStore::new()));
  for (id, workflow_id) in [("fine", "ok"), ("broken-1", "bad-1"), ("broken-2", "bad-2")] {
    orchestrator
      .register_provider(provider(id, workflow_id, TriggerConfig::new("onUpdate").asynchronous()))
      .await
      .unwrap();
  }

  let err = orchestrator.process_blob("blob-1", "user1", "onUpdate").await.unwrap_err();

  assert!(matches!(err, OrchestratorError::Aggregate { .. }));
  let mut failed: Vec<_> = err.failures().iter().filter_map(|e| e.provider_id()).collect();
  failed.sort();
  assert_eq!(failed, vec!["broken-1", "broken-2"]);
  assert_eq!(backend.requests().len(), 3);
}

#[tokio::test]
async fn test_sync_failure_cancels_async_work() {
  let backend = Arc::new(
    ScriptedBackend::default()
      .with(workflow("slow", "background"), Script::Slow(Duration::from_secs(60)))
      .with(workflow("check", "gatekeeper"), Script::Fail("rejected")),
  );
  let orchestrator = orchestrator(backend, Arc::new(MemoryDeltaStore::new()));
  orchestrator
    .register_provider(provider("background", "slow", TriggerConfig::new("onCreate").asynchronous()))
    .await
    .unwrap();
  orchestrator
    .register_provider(provider("gatekeeper", "check", TriggerConfig::new("onCreate")))
    .await
    .unwrap();

  let result = tokio::time::timeout(
    Duration::from_secs(5),
    orchestrator.process_blob("blob-1", "user1", "onCreate"),
  )
  .await
  .expect("sync failure should not wait for async work");

  let err = result.unwrap_err();
  let outcome = err.outcome().unwrap();
  assert_eq!(outcome.phase, DispatchPhase::Failed);
  assert_eq!(outcome.failed_at, Some(DispatchPhase::Executing));

  match err.cause() {
    OrchestratorError::Execution {
      provider_id, failure, ..
    } => {
      assert_eq!(provider_id, "gatekeeper");
      assert_eq!(failure.code, "STEP_FAILED");
      assert_eq!(failure.step_id.as_deref(), Some("validate"));
    }
    other => panic!("expected execution failure, got {other:?}"),
  }
}

#[tokio::test]
async fn test_pending_execution_is_polled() {
  let backend = Arc::new(
    ScriptedBackend::default().with(workflow("summarize", "summarizer"), Script::Pending(title_delta("polled"))),
  );
  let store = Arc::new(MemoryDeltaStore::new());
  let orchestrator = orchestrator(backend, store.clone());
  orchestrator
    .register_provider(provider("summarizer", "summarize", TriggerConfig::new("onCreate").asynchronous()))
    .await
    .unwrap();

  let report = orchestrator.process_blob("blob-1", "user1", "onCreate").await.unwrap();

  assert_eq!(report.applied(), 1);
  let state = store.blob_state("blob-1").await.unwrap().unwrap();
  assert_eq!(state.data["title"], "polled");
}

#[tokio::test(start_paused = true)]
async fn test_provider_timeout() {
  let backend = Arc::new(
    ScriptedBackend::default().with(workflow("slow", "sleepy"), Script::Slow(Duration::from_secs(600))),
  );
  let orchestrator = orchestrator(backend, Arc::new(MemoryDeltaStore::new()));
  let mut config = ProviderConfig::default();
  config.timeout_seconds = 2;
  orchestrator
    .register_provider(provider("sleepy", "slow", TriggerConfig::new("onCreate")).with_config(config))
    .await
    .unwrap();

  let err = orchestrator.process_blob("blob-1", "user1", "onCreate").await.unwrap_err();
  assert!(matches!(
    err.cause(),
    OrchestratorError::Timeout { provider_id, limit } if provider_id == "sleepy" && *limit == Duration::from_secs(2)
  ));
  assert_eq!(err.outcome().unwrap().failed_at, Some(DispatchPhase::Dispatching));
}

#[tokio::test]
async fn test_fail_mode_conflict_between_concurrent_providers() {
  let gate = Arc::new(Barrier::new(2));
  let backend = Arc::new(
    ScriptedBackend::default()
      .with(workflow("title-a", "writer-a"), Script::Gate(gate.clone(), title_delta("from a")))
      .with(workflow("title-b", "writer-b"), Script::Gate(gate, title_delta("from b"))),
  );
  let store = Arc::new(MemoryDeltaStore::new());
  let orchestrator = orchestrator(backend, store.clone());

  for (id, workflow_id) in [("writer-a", "title-a"), ("writer-b", "title-b")] {
    let mut config = ProviderConfig::default();
    config.delta_validation.conflict_resolution = ConflictResolution::Fail;
    orchestrator
      .register_provider(
        provider(id, workflow_id, TriggerConfig::new("onUpdate").asynchronous()).with_config(config),
      )
      .await
      .unwrap();
  }

  let err = orchestrator.process_blob("blob-1", "user1", "onUpdate").await.unwrap_err();

  assert!(err.is_conflict());
  assert_eq!(err.failures().len(), 1);
  let outcome = err.failures()[0].outcome().unwrap();
  assert_eq!(outcome.phase, DispatchPhase::Failed);
  assert_eq!(outcome.failed_at, Some(DispatchPhase::DeltaApplication));
  let state = store.blob_state("blob-1").await.unwrap().unwrap();
  assert!(state.data["title"] == "from a" || state.data["title"] == "from b");
}

#[tokio::test]
async fn test_duplicate_provider_rejected() {
  let backend = Arc::new(ScriptedBackend::default().with(workflow("summarize", "summarizer"), Script::Complete(json!({}))));
  let orchestrator = orchestrator(backend, Arc::new(MemoryDeltaStore::new()));
  let summarizer = provider("summarizer", "summarize", TriggerConfig::new("onCreate"));

  orchestrator.register_provider(summarizer.clone()).await.unwrap();
  let err = orchestrator.register_provider(summarizer).await.unwrap_err();

  assert!(matches!(
    err,
    OrchestratorError::Registration(RegistryError::DuplicateProvider { .. })
  ));
}

#[tokio::test]
async fn test_cyclic_workflow_rejected_at_registration() {
  let cyclic = Workflow::new("loop", "looper", "loop")
    .with_step(Step::new("a", StepType::Transform).after("b"))
    .with_step(Step::new("b", StepType::Transform).after("a"));
  let backend = Arc::new(ScriptedBackend::default().with(cyclic, Script::Complete(json!({}))));
  let orchestrator = orchestrator(backend, Arc::new(MemoryDeltaStore::new()));

  let err = orchestrator
    .register_provider(provider("looper", "loop", TriggerConfig::new("onCreate")))
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    OrchestratorError::Registration(RegistryError::InvalidWorkflow {
      source: WorkflowError::Cycle { .. },
      ..
    })
  ));
  assert!(orchestrator.registry().is_empty().await);
}

#[tokio::test]
async fn test_unknown_workflow_is_a_dispatch_error() {
  let orchestrator = orchestrator(Arc::new(ScriptedBackend::default()), Arc::new(MemoryDeltaStore::new()));

  let err = orchestrator
    .register_provider(provider("ghost", "missing", TriggerConfig::new("onCreate")))
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    OrchestratorError::Dispatch {
      source: BackendError::WorkflowNotFound { .. },
      ..
    }
  ));
}

#[tokio::test]
async fn test_provider_order_follows_step_providers() {
  let enrich = Workflow::new("enrich", "enricher", "enrich")
    .with_step(Step::new("fetch", StepType::Enrich).with_provider("fetcher"));
  let backend = Arc::new(
    ScriptedBackend::default()
      .with(enrich, Script::Complete(json!({})))
      .with(workflow("fetch", "fetcher"), Script::Complete(json!({}))),
  );
  let orchestrator = orchestrator(backend, Arc::new(MemoryDeltaStore::new()));
  orchestrator
    .register_provider(provider("enricher", "enrich", TriggerConfig::new("onCreate")))
    .await
    .unwrap();
  orchestrator
    .register_provider(provider("fetcher", "fetch", TriggerConfig::new("onCreate")))
    .await
    .unwrap();

  let dag = orchestrator.provider_dag().await;
  assert!(dag["enricher"].contains("fetcher"));
  assert!(dag["fetcher"].is_empty());
  assert_eq!(
    orchestrator.provider_order().await.unwrap(),
    vec![vec!["fetcher".to_string()], vec!["enricher".to_string()]]
  );
}

fn partly_invalid_output() -> Value {
  json!({
    "deltas": [
      { "type": "update", "path": "/title", "new_value": "written" },
      { "type": "delete", "path": "/missing" }
    ]
  })
}

async fn run_partly_invalid(strategy: RollbackStrategy) -> (OrchestratorError, Value) {
  let backend = Arc::new(
    ScriptedBackend::default().with(workflow("write", "writer"), Script::Complete(partly_invalid_output())),
  );
  let store = Arc::new(MemoryDeltaStore::new());
  store.seed("blob-1", json!({ "title": "original" })).await;
  let orchestrator = orchestrator(backend, store.clone());
  let mut config = ProviderConfig::default();
  config.rollback.strategy = strategy;
  orchestrator
    .register_provider(provider("writer", "write", TriggerConfig::new("onUpdate")).with_config(config))
    .await
    .unwrap();

  let err = orchestrator.process_blob("blob-1", "user1", "onUpdate").await.unwrap_err();
  let data = store.blob_state("blob-1").await.unwrap().unwrap().data;
  (err, data)
}

#[tokio::test]
async fn test_immediate_rollback_is_reported_in_outcome() {
  let (err, data) = run_partly_invalid(RollbackStrategy::Immediate).await;

  let outcome = err.outcome().unwrap();
  assert_eq!(outcome.provider_id, "writer");
  assert_eq!(outcome.phase, DispatchPhase::RolledBack);
  assert_eq!(outcome.failed_at, Some(DispatchPhase::DeltaApplication));
  assert_eq!(data, json!({ "title": "original" }));
}

#[tokio::test]
async fn test_deferred_rollback_is_reported_as_failed() {
  let (err, data) = run_partly_invalid(RollbackStrategy::Deferred).await;

  assert_eq!(err.outcome().unwrap().phase, DispatchPhase::Failed);
  assert_eq!(data, json!({ "title": "written" }));
}

/// Rejects every event it is asked to publish.
struct UnreachableBus;

#[async_trait]
impl EventBus for UnreachableBus {
  async fn publish(&self, _event: Event) -> Result<(), PublishError> {
    Err(PublishError::Transport("broker unreachable".to_string()))
  }
}

#[tokio::test]
async fn test_publish_failures_do_not_fail_processing() {
  let backend = Arc::new(
    ScriptedBackend::default().with(workflow("summarize", "summarizer"), Script::Complete(title_delta("kept"))),
  );
  let store = Arc::new(MemoryDeltaStore::new());
  let orchestrator = Orchestrator::new(
    Arc::new(ProviderRegistry::new()),
    backend,
    store.clone(),
    Arc::new(UnreachableBus),
    fast_config(),
  );
  orchestrator
    .register_provider(provider("summarizer", "summarize", TriggerConfig::new("onCreate")))
    .await
    .unwrap();

  let report = orchestrator.process_blob("blob-1", "user1", "onCreate").await.unwrap();

  assert_eq!(report.applied(), 1);
  assert_eq!(
    report.outcome("summarizer").unwrap().phase,
    DispatchPhase::EventPublished
  );
  let state = store.blob_state("blob-1").await.unwrap().unwrap();
  assert_eq!(state.data, json!({ "title": "kept" }));
}

#[tokio::test]
async fn test_provider_workflows_run_in_listed_order() {
  let backend = Arc::new(
    ScriptedBackend::default()
      .with(workflow("zeta", "pipeline"), Script::Complete(title_delta("first")))
      .with(
        workflow("alpha", "pipeline"),
        Script::Complete(json!({
          "deltas": [{ "type": "update", "path": "/summary", "new_value": "second" }]
        })),
      ),
  );
  let store = Arc::new(MemoryDeltaStore::new());
  let orchestrator = orchestrator(backend.clone(), store.clone());
  let pipeline = Provider::new("pipeline", "pipeline")
    .with_workflow("zeta")
    .with_workflow("alpha")
    .with_trigger(TriggerConfig::new("onCreate"));
  orchestrator.register_provider(pipeline).await.unwrap();

  let report = orchestrator.process_blob("blob-1", "user1", "onCreate").await.unwrap();

  let requests = backend.requests();
  let order: Vec<_> = requests.iter().map(|r| r.workflow_id.as_str()).collect();
  assert_eq!(order, vec!["zeta", "alpha"]);
  assert_eq!(requests[0].context.base_sequence, 0);
  assert_eq!(requests[1].context.base_sequence, 1);
  assert_eq!(requests[1].input.blob, json!({ "title": "first" }));

  let heads: Vec<_> = report.outcome("pipeline").unwrap().executions.iter().map(|e| e.head_sequence).collect();
  assert_eq!(heads, vec![1, 2]);
  let state = store.blob_state("blob-1").await.unwrap().unwrap();
  assert_eq!(state.data, json!({ "title": "first", "summary": "second" }));
}
