use std::collections::HashSet;
use std::path::Path;

use blobflow_orchestrator::OrchestratorConfig;
use blobflow_provider::Provider;
use blobflow_workflow::Workflow;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Manifest file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Json,
  Yaml,
}

impl Format {
  /// YAML for `.yaml` / `.yml`, JSON otherwise.
  pub fn from_path(path: &Path) -> Self {
    match path.extension().and_then(|e| e.to_str()) {
      Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => Self::Yaml,
      _ => Self::Json,
    }
  }
}

/// Process-level settings carried in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Base URL of the HTTP execution backend.
  pub backend_url: Option<String>,
  pub request_timeout_secs: u64,
  pub orchestrator: OrchestratorConfig,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      backend_url: None,
      request_timeout_secs: 30,
      orchestrator: OrchestratorConfig::default(),
    }
  }
}

/// Providers and workflow definitions to register, plus settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
  pub settings: Settings,
  pub workflows: Vec<Workflow>,
  pub providers: Vec<Provider>,
}

impl Manifest {
  /// Read and check a manifest file. The format follows the extension.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content, Format::from_path(path))
  }

  pub fn parse(content: &str, format: Format) -> Result<Self, ConfigError> {
    let manifest: Self = match format {
      Format::Json => serde_json::from_str(content)?,
      Format::Yaml => serde_yaml::from_str(content)?,
    };
    manifest.validate()?;
    Ok(manifest)
  }

  /// Reject duplicate ids, invalid workflow graphs and invalid triggers.
  ///
  /// Workflow ids a provider lists may be absent: they are resolved from
  /// the execution backend at registration.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for workflow in &self.workflows {
      if !seen.insert(workflow.workflow_id.as_str()) {
        return Err(ConfigError::DuplicateWorkflow {
          workflow_id: workflow.workflow_id.clone(),
        });
      }
      workflow
        .validate()
        .map_err(|source| ConfigError::InvalidWorkflow {
          workflow_id: workflow.workflow_id.clone(),
          source,
        })?;
    }

    let mut seen = HashSet::new();
    for provider in &self.providers {
      if !seen.insert(provider.provider_id.as_str()) {
        return Err(ConfigError::DuplicateProvider {
          provider_id: provider.provider_id.clone(),
        });
      }
      provider
        .validate()
        .map_err(|source| ConfigError::InvalidTrigger {
          provider_id: provider.provider_id.clone(),
          source,
        })?;
    }
    Ok(())
  }

  pub fn workflow(&self, workflow_id: &str) -> Option<&Workflow> {
    self.workflows.iter().find(|w| w.workflow_id == workflow_id)
  }

  pub fn provider(&self, provider_id: &str) -> Option<&Provider> {
    self.providers.iter().find(|p| p.provider_id == provider_id)
  }
}
