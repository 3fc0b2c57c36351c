use std::collections::{BTreeMap, BTreeSet};

use blobflow_workflow::{Workflow, topological_levels};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::event::Event;
use crate::provider::{Provider, TriggerConfig};

/// A provider selected for an event, with the trigger that selected it.
#[derive(Debug, Clone)]
pub struct TriggerMatch {
  pub provider: Provider,
  pub trigger: TriggerConfig,
}

#[derive(Default)]
struct RegistryState {
  providers: BTreeMap<String, Provider>,
  workflows: BTreeMap<String, Workflow>,
}

/// Registered providers and the workflows they run.
///
/// Written only on registration and read on every event, so it sits behind
/// a reader-writer lock. Iteration is always ordered by id.
#[derive(Default)]
pub struct ProviderRegistry {
  state: RwLock<RegistryState>,
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a provider together with the workflow definitions it runs.
  ///
  /// Every workflow is validated before anything is recorded. Workflow ids
  /// the provider lists must be in `workflows` or already registered.
  pub async fn register(&self, provider: Provider, workflows: Vec<Workflow>) -> Result<(), RegistryError> {
    provider
      .validate()
      .map_err(|source| RegistryError::InvalidTrigger {
        provider_id: provider.provider_id.clone(),
        source,
      })?;

    for workflow in &workflows {
      workflow
        .validate()
        .map_err(|source| RegistryError::InvalidWorkflow {
          workflow_id: workflow.workflow_id.clone(),
          source,
        })?;
    }

    let mut state = self.state.write().await;
    if state.providers.contains_key(&provider.provider_id) {
      return Err(RegistryError::DuplicateProvider {
        provider_id: provider.provider_id,
      });
    }

    for workflow_id in &provider.workflow_ids {
      let known = workflows.iter().any(|w| &w.workflow_id == workflow_id)
        || state.workflows.contains_key(workflow_id);
      if !known {
        return Err(RegistryError::WorkflowNotFound {
          workflow_id: workflow_id.clone(),
        });
      }
    }

    for workflow in workflows {
      debug!(workflow_id = %workflow.workflow_id, steps = workflow.steps.len(), "workflow_registered");
      state.workflows.insert(workflow.workflow_id.clone(), workflow);
    }

    info!(
      provider_id = %provider.provider_id,
      workflows = provider.workflow_ids.len(),
      triggers = provider.triggers.len(),
      "provider_registered"
    );
    state.providers.insert(provider.provider_id.clone(), provider);
    Ok(())
  }

  pub async fn contains(&self, provider_id: &str) -> bool {
    self.state.read().await.providers.contains_key(provider_id)
  }

  pub async fn get_provider(&self, provider_id: &str) -> Option<Provider> {
    self.state.read().await.providers.get(provider_id).cloned()
  }

  pub async fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
    self.state.read().await.workflows.get(workflow_id).cloned()
  }

  /// All providers, ordered by id.
  pub async fn providers(&self) -> Vec<Provider> {
    self.state.read().await.providers.values().cloned().collect()
  }

  pub async fn len(&self) -> usize {
    self.state.read().await.providers.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  /// Providers whose first satisfying trigger fires for `event`, ordered by id.
  pub async fn matching(&self, event: &Event) -> Vec<TriggerMatch> {
    let state = self.state.read().await;
    state
      .providers
      .values()
      .filter_map(|provider| {
        provider.matching_trigger(event).map(|trigger| TriggerMatch {
          provider: provider.clone(),
          trigger: trigger.clone(),
        })
      })
      .collect()
  }

  /// Provider id -> providers its workflows' steps belong to.
  ///
  /// Every registered provider appears as a key.
  pub async fn provider_dag(&self) -> BTreeMap<String, BTreeSet<String>> {
    let state = self.state.read().await;
    state
      .providers
      .values()
      .map(|provider| {
        let dependencies: BTreeSet<String> = provider
          .workflow_ids
          .iter()
          .filter_map(|id| state.workflows.get(id))
          .flat_map(|workflow| workflow.referenced_providers())
          .filter(|id| *id != provider.provider_id)
          .map(str::to_string)
          .collect();
        (provider.provider_id.clone(), dependencies)
      })
      .collect()
  }

  /// Providers grouped into levels where every provider comes after the
  /// providers it depends on. Referenced but unregistered providers appear
  /// as leaves.
  pub async fn provider_order(&self) -> Result<Vec<Vec<String>>, RegistryError> {
    let dag = self.provider_dag().await;
    let mut dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (provider_id, depends_on) in &dag {
      for dependency in depends_on {
        dependencies.entry(dependency.clone()).or_default();
      }
      dependencies.insert(provider_id.clone(), depends_on.iter().cloned().collect());
    }

    topological_levels(&dependencies).map_err(RegistryError::ProviderGraph)
  }
}
