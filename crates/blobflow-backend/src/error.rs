/// Errors raised while talking to an execution backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
  /// The backend could not be reached or the request timed out.
  #[error("backend unreachable: {0}")]
  Unreachable(String),

  #[error("backend returned HTTP {status}: {body}")]
  Http { status: u16, body: String },

  #[error("invalid backend response: {0}")]
  Decode(String),

  #[error("invalid backend url: {0}")]
  InvalidUrl(#[from] url::ParseError),

  #[error("workflow '{workflow_id}' not found")]
  WorkflowNotFound { workflow_id: String },

  #[error("execution '{execution_id}' not found")]
  ExecutionNotFound { execution_id: String },

  #[error("workflow '{workflow_id}' rejected: {message}")]
  Rejected { workflow_id: String, message: String },
}

impl From<reqwest::Error> for BackendError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::Decode(e.to_string())
    } else {
      Self::Unreachable(e.to_string())
    }
  }
}
