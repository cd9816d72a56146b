//! Worker error types.

use thiserror::Error;

use hclip_jobs::JobStoreError;
use hclip_media::MediaError;
use hclip_models::{JobId, JobState};
use hclip_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Submission rejected before a job was created
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Clip {index} not found for job {job_id}")]
    ClipNotFound { job_id: JobId, index: usize },

    #[error("Job {job_id} is not ready (status: {status})")]
    NotReady { job_id: JobId, status: JobState },

    #[error("Worker is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job store error: {0}")]
    JobStore(JobStoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::NotFound(_) | WorkerError::ClipNotFound { .. })
    }
}

impl From<JobStoreError> for WorkerError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => WorkerError::NotFound(id),
            other => WorkerError::JobStore(other),
        }
    }
}
