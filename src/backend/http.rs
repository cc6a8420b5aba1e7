//! HTTP/JSON task backend
//!
//! POSTs the task request as JSON and expects
//! `{ "summary", "artifacts": [{ "path", "content" }], "id"?, "error"? }`.

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::BackendConfig;
use crate::domain::VersionFile;

use super::{BackendError, TaskBackend, TaskOutcome, TaskRequest};

const USER_AGENT: &str = concat!("foundry/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    artifacts: Vec<VersionFile>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Task backend reached over HTTP
pub struct HttpTaskBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTaskBackend {
    /// Create a backend for an endpoint, optionally sending a bearer token
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, BackendError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Build from configuration
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`, never from the config file itself.
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| BackendError::NotConfigured("backend.endpoint is empty".to_string()))?;

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .filter(|key| !key.is_empty());

        Self::new(endpoint, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TaskBackend for HttpTaskBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, request: &TaskRequest) -> Result<TaskOutcome, BackendError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(BackendError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body: TaskResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(BackendError::Rejected(error));
        }

        Ok(TaskOutcome {
            artifacts: body.artifacts,
            summary: body.summary.unwrap_or_default(),
            backend_id: body.id,
        })
    }
}
