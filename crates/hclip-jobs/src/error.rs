//! Job store error types.

use thiserror::Error;

use hclip_models::{JobId, TransitionError};
use hclip_storage::StorageError;

/// Result type for job store operations.
pub type JobStoreResult<T> = Result<T, JobStoreError>;

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Invalid job id: {0}")]
    InvalidId(String),

    #[error("Rejected update: {0}")]
    Transition(#[from] TransitionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JobStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobStoreError::NotFound(_))
    }
}
