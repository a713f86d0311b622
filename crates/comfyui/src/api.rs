//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, history retrieval,
//! liveness) using [`reqwest`]. One client, and therefore one connection
//! pool, is shared by every call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use snap_core::workflow::WorkflowDocument;

use crate::history::HistoryEntry;

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation problems ComfyUI accepted the prompt with.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// JSON-encoded `error` field of the response, or the raw body.
        body: String,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Unexpected ComfyUI response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ComfyUIApiError {
    /// HTTP status of the failed call, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::Decode(_) => None,
        }
    }
}

/// The two backend operations a job needs.
///
/// Implemented by [`ComfyUIApi`]; the worker depends on this trait so the
/// job state machine can run against an in-memory backend in tests.
#[async_trait]
pub trait ComfyUIBackend: Send + Sync {
    /// Queue a workflow for execution.
    async fn submit(&self, workflow: &WorkflowDocument) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Look up a prompt in the execution history.
    ///
    /// `Ok(None)` means ComfyUI has not registered the prompt yet.
    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError>;
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:3000`.
    /// * `timeout` - Per-request timeout.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// HTTP API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowDocument,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;

        if submitted
            .node_errors
            .as_object()
            .is_some_and(|errors| !errors.is_empty())
        {
            tracing::warn!(
                prompt_id = %submitted.prompt_id,
                node_errors = %submitted.node_errors,
                "ComfyUI queued prompt with node errors",
            );
        }

        Ok(submitted)
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. ComfyUI answers with an
    /// object keyed by prompt ID, which is empty until the prompt has been
    /// registered.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let mut body: serde_json::Map<String, serde_json::Value> =
            Self::parse_response(response).await?;

        match body.remove(prompt_id) {
            Some(entry) => Ok(Some(serde_json::from_value(entry)?)),
            None => Ok(None),
        }
    }

    /// Probe the root endpoint. Returns `true` on HTTP 200.
    pub async fn is_alive(&self) -> Result<bool, reqwest::Error> {
        let response = self.client.get(format!("{}/", self.api_url)).send().await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and server message on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body: error_body(&text),
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ComfyUIBackend for ComfyUIApi {
    async fn submit(&self, workflow: &WorkflowDocument) -> Result<SubmitResponse, ComfyUIApiError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        self.submit_workflow(workflow, &client_id).await
    }

    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }
}

/// Extract the server's own error from a failed response body.
///
/// ComfyUI reports failures as `{"error": {...}, "node_errors": {...}}`;
/// the `error` field is re-encoded as JSON. Bodies that are not JSON (or
/// have no `error` field) are returned verbatim.
fn error_body(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|json| json.get("error").map(|e| e.to_string()))
        .unwrap_or_else(|| text.to_string())
}
