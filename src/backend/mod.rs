//! Task backends that execute code tasks on behalf of the engine
//!
//! The engine only sees the `TaskBackend` trait; which model or service sits
//! behind it is a deployment concern.

pub mod http;

pub use http::HttpTaskBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Job, JobType, VersionFile};

/// Errors a backend can report for a single task
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Backend error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Task rejected: {0}")]
    Rejected(String),
}

/// What the engine hands to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub job_id: Uuid,
    pub project_id: Uuid,
    pub job_type: JobType,
    pub input_prompt: String,
    pub context_data: Option<serde_json::Value>,
}

impl From<&Job> for TaskRequest {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            project_id: job.project_id,
            job_type: job.job_type,
            input_prompt: job.input_prompt.clone(),
            context_data: job.context_data.clone(),
        }
    }
}

/// Result of a successful task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    /// Files of the produced version, for mutating job types
    #[serde(default)]
    pub artifacts: Vec<VersionFile>,
    /// Human-readable result summary recorded in job metadata
    #[serde(default)]
    pub summary: String,
    /// Backend-side identifier for the run
    pub backend_id: Option<String>,
}

/// A service that can execute code tasks
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Backend name recorded in job metadata
    fn name(&self) -> &str;

    /// Execute one task; the engine bounds this call with a timeout
    async fn execute(&self, request: &TaskRequest) -> Result<TaskOutcome, BackendError>;
}

/// Backend used when no endpoint is configured; every task fails
pub struct UnconfiguredBackend;

#[async_trait]
impl TaskBackend for UnconfiguredBackend {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn execute(&self, _request: &TaskRequest) -> Result<TaskOutcome, BackendError> {
        Err(BackendError::NotConfigured(
            "set backend.endpoint to run jobs".to_string(),
        ))
    }
}
