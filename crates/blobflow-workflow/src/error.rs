use thiserror::Error;

/// Errors raised while validating a workflow graph.
///
/// All of these are fatal at registration time: a workflow that fails
/// validation is never dispatched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
  #[error("duplicate step id: {step_id}")]
  DuplicateStep { step_id: String },

  #[error("step '{step_id}' depends on unknown step '{dependency}'")]
  DanglingDependency { step_id: String, dependency: String },

  #[error("cycle detected among steps: {}", .remaining.join(", "))]
  Cycle { remaining: Vec<String> },

  #[error("step '{step_id}' references unknown step '{reference}'")]
  UnknownStepReference { step_id: String, reference: String },

  #[error("step '{step_id}' reads the output of '{reference}' without depending on it")]
  UndeclaredDependency { step_id: String, reference: String },

  #[error("invalid value reference '{reference}': {message}")]
  InvalidReference { reference: String, message: String },

  #[error("invalid condition on '{field}': {message}")]
  InvalidCondition { field: String, message: String },
}
