use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::WorkflowError;
use crate::step::Step;

/// Step dependency graph used for validation and scheduling.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  /// step_id -> the steps it depends on (upstream).
  dependencies: BTreeMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from a workflow's steps.
  pub fn new(steps: &[Step]) -> Self {
    let dependencies = steps
      .iter()
      .map(|step| (step.step_id.clone(), step.depends_on.clone()))
      .collect();
    Self::from_dependencies(dependencies)
  }

  /// Build a graph from a raw `id -> dependencies` map.
  pub fn from_dependencies(dependencies: BTreeMap<String, Vec<String>>) -> Self {
    Self { dependencies }
  }

  /// Number of steps in the graph.
  pub fn len(&self) -> usize {
    self.dependencies.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dependencies.is_empty()
  }

  /// Get the steps the given step depends on.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .dependencies
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Whether `step_id` depends on `other`, directly or transitively.
  pub fn depends_on(&self, step_id: &str, other: &str) -> bool {
    let mut stack: Vec<&str> = self.upstream(step_id).iter().map(String::as_str).collect();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    while let Some(current) = stack.pop() {
      if current == other {
        return true;
      }
      if seen.insert(current) {
        stack.extend(self.upstream(current).iter().map(String::as_str));
      }
    }

    false
  }

  /// Level-grouped execution order. See [`topological_levels`].
  pub fn levels(&self) -> Result<Vec<Vec<String>>, WorkflowError> {
    topological_levels(&self.dependencies)
  }
}

/// Kahn's algorithm with level grouping.
///
/// Each level is the entire ready queue at that point: no two members of a
/// level depend on each other. Levels are sorted by id. If fewer ids are
/// emitted than exist the graph has a cycle and no partial order is returned.
pub fn topological_levels(
  dependencies: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>, WorkflowError> {
  let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
  let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

  for id in dependencies.keys() {
    in_degree.insert(id.as_str(), 0);
  }

  for (id, deps) in dependencies {
    for dep in deps {
      if !dependencies.contains_key(dep) {
        return Err(WorkflowError::DanglingDependency {
          step_id: id.clone(),
          dependency: dep.clone(),
        });
      }
      if let Some(degree) = in_degree.get_mut(id.as_str()) {
        *degree += 1;
      }
      dependents.entry(dep.as_str()).or_default().push(id.as_str());
    }
  }

  let mut queue: Vec<&str> = in_degree
    .iter()
    .filter(|(_, degree)| **degree == 0)
    .map(|(id, _)| *id)
    .collect();

  let mut levels = Vec::new();
  let mut emitted = 0;

  while !queue.is_empty() {
    let mut next = Vec::new();

    for id in &queue {
      for child in dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[]) {
        if let Some(degree) = in_degree.get_mut(child) {
          *degree -= 1;
          if *degree == 0 {
            next.push(*child);
          }
        }
      }
    }

    emitted += queue.len();
    levels.push(queue.iter().map(|id| id.to_string()).collect());

    next.sort_unstable();
    queue = next;
  }

  if emitted < dependencies.len() {
    let remaining = in_degree
      .into_iter()
      .filter(|(_, degree)| *degree > 0)
      .map(|(id, _)| id.to_string())
      .collect();
    return Err(WorkflowError::Cycle { remaining });
  }

  Ok(levels)
}
