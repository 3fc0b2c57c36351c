use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::step::Step;

/// Execution-wide settings for a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
  /// Maximum steps running at once within a level. 0 means unbounded.
  pub max_concurrency: usize,
  pub stop_on_error: bool,
  pub rollback_enabled: bool,
  pub lineage_tracking: bool,
  pub auto_retry: bool,
  /// 0 means no limit.
  pub max_execution_time_secs: u64,
}

impl Default for ProcessingConfig {
  fn default() -> Self {
    Self {
      max_concurrency: 4,
      stop_on_error: true,
      rollback_enabled: true,
      lineage_tracking: false,
      auto_retry: false,
      max_execution_time_secs: 0,
    }
  }
}

impl ProcessingConfig {
  pub fn max_execution_time(&self) -> Option<Duration> {
    (self.max_execution_time_secs > 0).then(|| Duration::from_secs(self.max_execution_time_secs))
  }
}

/// A named graph of steps owned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub workflow_id: String,
  #[serde(default)]
  pub provider_id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub steps: Vec<Step>,
  #[serde(default)]
  pub config: ProcessingConfig,
}

impl Workflow {
  pub fn new(
    workflow_id: impl Into<String>,
    provider_id: impl Into<String>,
    name: impl Into<String>,
  ) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      provider_id: provider_id.into(),
      name: name.into(),
      description: String::new(),
      steps: Vec::new(),
      config: ProcessingConfig::default(),
    }
  }

  /// Append a step. Steps are only appended before the first execution.
  pub fn add_step(&mut self, step: Step) {
    self.steps.push(step);
  }

  pub fn with_step(mut self, step: Step) -> Self {
    self.add_step(step);
    self
  }

  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&Step> {
    self.steps.iter().find(|step| step.step_id == step_id)
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.steps)
  }

  /// Validate structure: unique ids, known dependencies, acyclicity, and
  /// step references that are backed by a declared dependency.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    self.execution_levels().map(|_| ())
  }

  /// Validate and compute the level-grouped execution order.
  pub fn execution_levels(&self) -> Result<Vec<Vec<String>>, WorkflowError> {
    let mut seen = HashSet::new();
    for step in &self.steps {
      if !seen.insert(step.step_id.as_str()) {
        return Err(WorkflowError::DuplicateStep {
          step_id: step.step_id.clone(),
        });
      }
    }

    let graph = self.graph();
    let levels = graph.levels()?;

    for step in &self.steps {
      if let Some(condition) = &step.condition {
        condition.validate()?;
      }

      for reference in step.referenced_steps() {
        if reference == step.step_id {
          continue;
        }
        if !seen.contains(reference) {
          return Err(WorkflowError::UnknownStepReference {
            step_id: step.step_id.clone(),
            reference: reference.to_string(),
          });
        }
        if !graph.depends_on(&step.step_id, reference) {
          return Err(WorkflowError::UndeclaredDependency {
            step_id: step.step_id.clone(),
            reference: reference.to_string(),
          });
        }
      }
    }

    Ok(levels)
  }

  /// Providers other than the owner that this workflow's steps belong to.
  pub fn referenced_providers(&self) -> BTreeSet<&str> {
    self
      .steps
      .iter()
      .map(|step| step.provider_id.as_str())
      .filter(|id| !id.is_empty() && *id != self.provider_id)
      .collect()
  }
}
