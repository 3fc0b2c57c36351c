use std::time::Duration;

use async_trait::async_trait;
use blobflow_workflow::Workflow;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::backend::ExecutionBackend;
use crate::error::BackendError;
use crate::types::{ExecuteRequest, ExecutionResponse};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a 404 from the backend means for a given call.
enum Missing<'a> {
  Workflow(&'a str),
  Execution(&'a str),
  Nothing,
}

/// [`ExecutionBackend`] speaking HTTP+JSON.
///
/// | operation              | request                            |
/// |------------------------|------------------------------------|
/// | `execute_workflow`     | `POST /workflows/{id}/executions`  |
/// | `get_execution_status` | `GET /executions/{id}`             |
/// | `cancel_execution`     | `POST /executions/{id}/cancel`     |
/// | `register_workflow`    | `POST /workflows`                  |
/// | `update_workflow`      | `PUT /workflows/{id}`              |
/// | `get_workflow`         | `GET /workflows/{id}`              |
/// | `list_workflows`       | `GET /workflows?provider_id={id}`  |
#[derive(Debug, Clone)]
pub struct HttpBackend {
  client: Client,
  base_url: Url,
}

impl HttpBackend {
  pub fn new(base_url: &str) -> Result<Self, BackendError> {
    Self::with_timeout(base_url, DEFAULT_TIMEOUT)
  }

  pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
    let base_url = Url::parse(base_url)?;
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| BackendError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn send<B: Serialize + ?Sized>(
    &self,
    method: Method,
    url: Url,
    body: Option<&B>,
    missing: Missing<'_>,
  ) -> Result<reqwest::Response, BackendError> {
    debug!(method = %method, url = %url, "backend_request");
    let mut request = self.client.request(method, url);
    if let Some(body) = body {
      request = request.json(body);
    }
    let response = request.send().await?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match (status, missing) {
      (StatusCode::NOT_FOUND, Missing::Workflow(id)) => BackendError::WorkflowNotFound {
        workflow_id: id.to_string(),
      },
      (StatusCode::NOT_FOUND, Missing::Execution(id)) => BackendError::ExecutionNotFound {
        execution_id: id.to_string(),
      },
      (StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY, Missing::Workflow(id)) => {
        BackendError::Rejected {
          workflow_id: id.to_string(),
          message: body,
        }
      }
      _ => BackendError::Http {
        status: status.as_u16(),
        body,
      },
    })
  }

  async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
  }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
  async fn execute_workflow(&self, request: ExecuteRequest) -> Result<ExecutionResponse, BackendError> {
    let url = self.url(&["workflows", request.workflow_id.as_str(), "executions"])?;
    let response = self
      .send(Method::POST, url, Some(&request), Missing::Workflow(&request.workflow_id))
      .await?;
    Self::json(response).await
  }

  async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionResponse, BackendError> {
    let url = self.url(&["executions", execution_id])?;
    let response = self
      .send::<()>(Method::GET, url, None, Missing::Execution(execution_id))
      .await?;
    Self::json(response).await
  }

  async fn cancel_execution(&self, execution_id: &str) -> Result<(), BackendError> {
    let url = self.url(&["executions", execution_id, "cancel"])?;
    self
      .send::<()>(Method::POST, url, None, Missing::Execution(execution_id))
      .await?;
    Ok(())
  }

  async fn register_workflow(&self, workflow: &Workflow) -> Result<(), BackendError> {
    let url = self.url(&["workflows"])?;
    self
      .send(Method::POST, url, Some(workflow), Missing::Workflow(&workflow.workflow_id))
      .await?;
    Ok(())
  }

  async fn update_workflow(&self, workflow: &Workflow) -> Result<(), BackendError> {
    let url = self.url(&["workflows", workflow.workflow_id.as_str()])?;
    self
      .send(Method::PUT, url, Some(workflow), Missing::Workflow(&workflow.workflow_id))
      .await?;
    Ok(())
  }

  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, BackendError> {
    let url = self.url(&["workflows", workflow_id])?;
    let response = self
      .send::<()>(Method::GET, url, None, Missing::Workflow(workflow_id))
      .await?;
    Self::json(response).await
  }

  async fn list_workflows(&self, provider_id: &str) -> Result<Vec<Workflow>, BackendError> {
    let mut url = self.url(&["workflows"])?;
    url.query_pairs_mut().append_pair("provider_id", provider_id);
    let response = self
      .send::<()>(Method::GET, url, None, Missing::Nothing)
      .await?;
    Self::json(response).await
  }
}
