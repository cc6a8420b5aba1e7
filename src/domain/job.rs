//! Job domain model - an asynchronous code task executed against a project

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::LogEntry;

/// The kind of code task a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Debug,
    Patch,
    Refactor,
    Generate,
    Review,
}

impl JobType {
    /// Whether a successful run of this type produces a new version
    pub fn produces_version(&self) -> bool {
        matches!(self, JobType::Patch | JobType::Refactor | JobType::Generate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Debug => "debug",
            JobType::Patch => "patch",
            JobType::Refactor => "refactor",
            JobType::Generate => "generate",
            JobType::Review => "review",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "debug" => Ok(JobType::Debug),
            "patch" => Ok(JobType::Patch),
            "refactor" => Ok(JobType::Refactor),
            "generate" => Ok(JobType::Generate),
            "review" => Ok(JobType::Review),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Terminal statuses are frozen; only metadata may still change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Why a job ended in `failed`, recorded as `metadata.errorCode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    BackendError,
    BackendTimeout,
    StorageFailure,
    VersionRejected,
    Interrupted,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::BackendError => "BACKEND_ERROR",
            FailureCode::BackendTimeout => "BACKEND_TIMEOUT",
            FailureCode::StorageFailure => "STORAGE_FAILURE",
            FailureCode::VersionRejected => "VERSION_REJECTED",
            FailureCode::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of asynchronous work executed against a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub prompt_profile_id: Option<String>,
    pub context_data: Option<serde_json::Value>,
    pub input_prompt: String,
    pub status: JobStatus,
    pub metadata: serde_json::Value,
    pub mark_stable: bool,
    pub base_version_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(project_id: Uuid, job_type: JobType, input_prompt: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            job_type,
            prompt_profile_id: None,
            context_data: None,
            input_prompt,
            status: JobStatus::Pending,
            metadata: serde_json::json!({}),
            mark_stable: false,
            base_version_id: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Failure code recorded in metadata, if any
    pub fn failure_code(&self) -> Option<&str> {
        self.metadata.get("errorCode").and_then(|v| v.as_str())
    }
}

/// Request body for `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub project_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub input_prompt: String,
    pub context_data: Option<serde_json::Value>,
    pub prompt_profile_id: Option<String>,
    /// Mark the version produced by this job stable on success
    #[serde(default)]
    pub mark_stable: bool,
    /// Parent for the produced version; defaults to the project's stable version
    pub base_version_id: Option<Uuid>,
}

impl CreateJobRequest {
    pub fn new(project_id: Uuid, job_type: &str, input_prompt: &str) -> Self {
        Self {
            project_id,
            job_type: job_type.to_string(),
            input_prompt: input_prompt.to_string(),
            context_data: None,
            prompt_profile_id: None,
            mark_stable: false,
            base_version_id: None,
        }
    }
}

/// Filter for job listing; results are newest first
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
    #[serde(default = "default_job_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub const DEFAULT_JOB_LIMIT: i64 = 50;
pub const MAX_JOB_LIMIT: i64 = 200;

fn default_job_limit() -> i64 {
    DEFAULT_JOB_LIMIT
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            project_id: None,
            status: None,
            job_type: None,
            limit: DEFAULT_JOB_LIMIT,
            offset: 0,
        }
    }
}

impl JobFilter {
    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            ..Default::default()
        }
    }

    /// Limit clamped to 1..=MAX_JOB_LIMIT, offset floored at 0
    pub fn normalized(&self) -> (i64, i64) {
        (self.limit.clamp(1, MAX_JOB_LIMIT), self.offset.max(0))
    }
}

/// Job with its log entries in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobWithLogs {
    #[serde(flatten)]
    pub job: Job,
    pub logs: Vec<LogEntry>,
}
