//! Error taxonomy shared by every orchestrator operation

use thiserror::Error;

/// Errors surfaced by the project, version, job and log operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Malformed enum value or missing required field
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown project, version or job id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Label collision, deleting a stable version, cancelling a terminal job
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The external task backend errored or timed out
    #[error("Backend failure: {0}")]
    BackendFailure(String),

    /// The durable store is unavailable
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] sqlx::Error),
}

impl OrchestratorError {
    pub fn invalid(message: impl Into<String>) -> Self {
        OrchestratorError::InvalidArgument(message.into())
    }

    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        OrchestratorError::NotFound(format!("{} {} not found", kind, id))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        OrchestratorError::Conflict(message.into())
    }

    /// Stable machine-readable code for API responses and job metadata
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidArgument(_) => "INVALID_ARGUMENT",
            OrchestratorError::NotFound(_) => "NOT_FOUND",
            OrchestratorError::Conflict(_) => "CONFLICT",
            OrchestratorError::BackendFailure(_) => "BACKEND_FAILURE",
            OrchestratorError::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }

    /// Whether the failure came from the store and may succeed on retry
    pub fn is_storage(&self) -> bool {
        matches!(self, OrchestratorError::StorageFailure(_))
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
