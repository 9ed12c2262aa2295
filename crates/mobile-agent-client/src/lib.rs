#![cfg_attr(test, allow(clippy::expect_used))]

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
pub use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:50005";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:50006";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const MIN_TIMEOUT_MS: u64 = 250;

/// Raw body chunks of a running task, exactly as the task server flushed them.
pub type TaskEventStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ClientError>> + Send>>;

#[derive(Debug, Clone)]
pub struct MobileAgentClientConfig {
    /// Device server: liveness probe and screenshots.
    pub backend_base_url: String,
    /// Task server: task execution, stop, status.
    pub frontend_base_url: String,
    pub timeout_ms: u64,
}

impl MobileAgentClientConfig {
    #[must_use]
    pub fn new(backend_base_url: impl Into<String>, frontend_base_url: impl Into<String>) -> Self {
        Self {
            backend_base_url: backend_base_url.into(),
            frontend_base_url: frontend_base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Default for MobileAgentClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL, DEFAULT_FRONTEND_URL)
    }
}

#[derive(Debug, Clone)]
pub struct MobileAgentClient {
    backend_base_url: String,
    frontend_base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("mobile_agent_client_base_url_missing")]
    BaseUrlMissing,
    #[error("mobile_agent_client_invalid_path")]
    InvalidPath,
    #[error("mobile_agent_request_failed:{message}")]
    Request { message: String },
    #[error("mobile_agent_read_failed:{message}")]
    Read { message: String },
    #[error("mobile_agent_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("mobile_agent_json_decode_failed:{message}")]
    Decode { message: String },
}

#[derive(Debug, Serialize)]
pub struct ExecuteTaskRequest<'a> {
    pub instruction: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StopTaskResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TaskServerProgress {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskServerStatus {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub progress: TaskServerProgress,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskServerStats {
    #[serde(default)]
    pub total_actions: u64,
    #[serde(default)]
    pub model_calls: u64,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskServerLogs {
    #[serde(default)]
    pub logs: Vec<serde_json::Value>,
}

impl MobileAgentClient {
    pub fn new(config: MobileAgentClientConfig) -> Result<Self, ClientError> {
        let backend_base_url = normalize_base_url(&config.backend_base_url)?;
        let frontend_base_url = normalize_base_url(&config.frontend_base_url)?;
        let timeout = Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS));
        // The task stream stays open for the whole run, so only the connect phase
        // is bounded at the client level; one-shot requests set their own timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })?;
        Ok(Self {
            backend_base_url,
            frontend_base_url,
            timeout,
            http,
        })
    }

    #[must_use]
    pub fn backend_base_url(&self) -> &str {
        &self.backend_base_url
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn backend_endpoint(&self, path: &str) -> Option<String> {
        join_endpoint(&self.backend_base_url, path)
    }

    #[must_use]
    pub fn frontend_endpoint(&self, path: &str) -> Option<String> {
        join_endpoint(&self.frontend_base_url, path)
    }

    #[must_use]
    pub fn ping_path() -> &'static str {
        "/ping"
    }

    #[must_use]
    pub fn screenshot_path() -> &'static str {
        "/screenshot"
    }

    #[must_use]
    pub fn named_screenshot_path(name: &str) -> String {
        format!("/screenshot/{}", name.trim().trim_start_matches('/'))
    }

    #[must_use]
    pub fn execute_task_path() -> &'static str {
        "/execute_task"
    }

    #[must_use]
    pub fn stop_task_path() -> &'static str {
        "/stop_task"
    }

    #[must_use]
    pub fn status_path() -> &'static str {
        "/status"
    }

    #[must_use]
    pub fn stats_path() -> &'static str {
        "/stats"
    }

    #[must_use]
    pub fn logs_path() -> &'static str {
        "/logs"
    }

    /// Liveness probe against the device server; any 2xx counts as connected.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let url = self
            .backend_endpoint(Self::ping_path())
            .ok_or(ClientError::InvalidPath)?;
        let response = self.send(self.http.get(url.as_str()).timeout(self.timeout)).await?;
        ensure_success(response).await.map(|_| ())
    }

    /// Latest screenshot as raw image bytes.
    pub async fn latest_screenshot(&self) -> Result<Vec<u8>, ClientError> {
        let url = self
            .backend_endpoint(Self::screenshot_path())
            .ok_or(ClientError::InvalidPath)?;
        let response = self.send(self.http.get(url.as_str()).timeout(self.timeout)).await?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// Starts a task and hands back the undecoded response body.
    pub async fn execute_task(&self, instruction: &str) -> Result<TaskEventStream, ClientError> {
        let url = self
            .frontend_endpoint(Self::execute_task_path())
            .ok_or(ClientError::InvalidPath)?;
        let request = self
            .http
            .post(url.as_str())
            .json(&ExecuteTaskRequest { instruction });
        let response = self.send(request).await?;
        let response = ensure_success(response).await?;
        tracing::debug!(url = %url, "task stream opened");

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|error| ClientError::Read {
                    message: error.to_string(),
                })
        });
        Ok(Box::pin(stream))
    }

    pub async fn stop_task(&self) -> Result<StopTaskResponse, ClientError> {
        let url = self
            .frontend_endpoint(Self::stop_task_path())
            .ok_or(ClientError::InvalidPath)?;
        let response = self
            .send(self.http.post(url.as_str()).timeout(self.timeout))
            .await?;
        decode_json_response(response).await
    }

    pub async fn server_status(&self) -> Result<TaskServerStatus, ClientError> {
        self.get_frontend_json(Self::status_path()).await
    }

    pub async fn server_stats(&self) -> Result<TaskServerStats, ClientError> {
        self.get_frontend_json(Self::stats_path()).await
    }

    pub async fn server_logs(&self) -> Result<TaskServerLogs, ClientError> {
        self.get_frontend_json(Self::logs_path()).await
    }

    async fn get_frontend_json<T>(&self, path: &str) -> Result<T, ClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = self
            .frontend_endpoint(path)
            .ok_or(ClientError::InvalidPath)?;
        let response = self.send(self.http.get(url.as_str()).timeout(self.timeout)).await?;
        decode_json_response(response).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ClientError> {
        request
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .send()
            .await
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ClientError::Http { status, body }
}

/// URL of a named screenshot on the device server, with a cache-busting query.
#[must_use]
pub fn named_screenshot_url(base_url: &str, name: &str, cache_bust: i64) -> String {
    format!(
        "{}{}?t={cache_bust}",
        base_url.trim().trim_end_matches('/'),
        MobileAgentClient::named_screenshot_path(name)
    )
}

fn normalize_base_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn join_endpoint(base_url: &str, path: &str) -> Option<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('/') {
        Some(format!("{base_url}{trimmed}"))
    } else {
        Some(format!("{base_url}/{trimmed}"))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;
    Err(format_http_error(status, &bytes))
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
