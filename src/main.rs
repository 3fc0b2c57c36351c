use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

use blobflow_backend::{BackendError, ExecutionBackend, HttpBackend};
use blobflow_config::Manifest;
use blobflow_delta::{DeltaStore, MemoryDeltaStore};
use blobflow_orchestrator::{ChannelEventBus, Orchestrator};
use blobflow_provider::{Event, ProviderRegistry};

/// Blobflow - event-driven workflow orchestration for blob processing
#[derive(Parser)]
#[command(name = "blobflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the manifest (JSON, or YAML for .yaml/.yml)
  #[arg(long, short, global = true, default_value = "blobflow.json")]
  manifest: PathBuf,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Print the execution levels of every workflow in the manifest
  Plan {
    /// Only this workflow
    #[arg(long)]
    workflow: Option<String>,
  },

  /// Print the provider dependency graph and the order it implies
  Dag,

  /// Process one blob event against an HTTP execution backend
  Process {
    #[arg(long)]
    blob_id: String,

    #[arg(long, default_value = "cli")]
    user_id: String,

    /// Event type, e.g. onCreate
    #[arg(long, default_value = "onCreate")]
    event: String,

    /// Current blob data as JSON
    #[arg(long)]
    data: Option<String>,

    /// Event payload as a JSON object
    #[arg(long)]
    payload: Option<String>,

    /// Backend base URL; falls back to the manifest's settings
    #[arg(long, env = "BLOBFLOW_BACKEND_URL")]
    backend_url: Option<String>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Plan { workflow }) => plan(cli.manifest, workflow),
    Some(Commands::Dag) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { dag(cli.manifest).await })
    }
    Some(Commands::Process {
      blob_id,
      user_id,
      event,
      data,
      payload,
      backend_url,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async {
        process(
          cli.manifest,
          ProcessArgs {
            blob_id,
            user_id,
            event,
            data,
            payload,
            backend_url,
          },
        )
        .await
      })
    }
    None => {
      println!("blobflow - use --help to see available commands");
      Ok(())
    }
  }
}

fn load_manifest(path: &PathBuf) -> Result<Manifest> {
  Manifest::load(path).with_context(|| format!("failed to load manifest: {}", path.display()))
}

fn plan(manifest_path: PathBuf, only: Option<String>) -> Result<()> {
  let manifest = load_manifest(&manifest_path)?;

  let mut plans = serde_json::Map::new();
  for workflow in &manifest.workflows {
    if only.as_deref().is_some_and(|id| id != workflow.workflow_id) {
      continue;
    }
    let levels = workflow
      .execution_levels()
      .with_context(|| format!("workflow '{}' cannot be scheduled", workflow.workflow_id))?;
    plans.insert(workflow.workflow_id.clone(), json!(levels));
  }

  if let Some(id) = only
    && plans.is_empty()
  {
    bail!("workflow '{}' is not in {}", id, manifest_path.display());
  }

  println!("{}", serde_json::to_string_pretty(&plans)?);
  Ok(())
}

async fn dag(manifest_path: PathBuf) -> Result<()> {
  let manifest = load_manifest(&manifest_path)?;
  let registry = ProviderRegistry::new();

  for provider in manifest.providers.iter().cloned() {
    let workflows = provider
      .workflow_ids
      .iter()
      .filter_map(|id| manifest.workflow(id).cloned())
      .collect();
    let provider_id = provider.provider_id.clone();
    registry
      .register(provider, workflows)
      .await
      .with_context(|| format!("failed to register provider '{}'", provider_id))?;
  }

  let order = registry
    .provider_order()
    .await
    .context("provider graph is not acyclic")?;
  let output = json!({
    "dag": registry.provider_dag().await,
    "order": order,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

struct ProcessArgs {
  blob_id: String,
  user_id: String,
  event: String,
  data: Option<String>,
  payload: Option<String>,
  backend_url: Option<String>,
}

async fn process(manifest_path: PathBuf, args: ProcessArgs) -> Result<()> {
  let manifest = load_manifest(&manifest_path)?;

  let Some(url) = args.backend_url.or(manifest.settings.backend_url.clone()) else {
    bail!("no backend url: pass --backend-url, set BLOBFLOW_BACKEND_URL or settings.backend_url");
  };
  let timeout = Duration::from_secs(manifest.settings.request_timeout_secs.max(1));
  let backend = Arc::new(
    HttpBackend::with_timeout(&url, timeout).with_context(|| format!("invalid backend url: {}", url))?,
  );

  for workflow in &manifest.workflows {
    match backend.get_workflow(&workflow.workflow_id).await {
      Ok(_) => {}
      Err(BackendError::WorkflowNotFound { .. }) => {
        backend
          .register_workflow(workflow)
          .await
          .with_context(|| format!("failed to register workflow '{}'", workflow.workflow_id))?;
        info!(workflow_id = %workflow.workflow_id, "workflow_published");
      }
      Err(e) => return Err(e).context("execution backend unavailable"),
    }
  }

  let store = Arc::new(MemoryDeltaStore::new());
  if let Some(data) = &args.data {
    let data: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
    store.seed(&args.blob_id, data).await;
  }

  let (bus, mut events) = ChannelEventBus::channel();
  let orchestrator = Orchestrator::new(
    Arc::new(ProviderRegistry::new()),
    backend,
    store.clone(),
    Arc::new(bus),
    manifest.settings.orchestrator.clone(),
  );

  for provider in manifest.providers.iter().cloned() {
    let provider_id = provider.provider_id.clone();
    orchestrator
      .register_provider(provider)
      .await
      .with_context(|| format!("failed to register provider '{}'", provider_id))?;
  }

  let mut event = Event::new(&args.event, &args.blob_id, &args.user_id);
  if let Some(payload) = &args.payload {
    let payload: Value = serde_json::from_str(payload).context("--payload is not valid JSON")?;
    let Value::Object(payload) = payload else {
      bail!("--payload must be a JSON object");
    };
    event.data = payload;
  }

  let report = orchestrator
    .process_event(event)
    .await
    .with_context(|| format!("failed to process {} for blob '{}'", args.event, args.blob_id))?;

  let mut published = Vec::new();
  while let Ok(event) = events.try_recv() {
    published.push(event);
  }
  let blob = store
    .blob_state(&args.blob_id)
    .await
    .context("failed to read blob state")?;

  let output = json!({
    "report": report,
    "events": published,
    "blob": blob.map(|b| json!({ "data": b.data, "head_sequence": b.head_sequence })),
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}
