//! Stage executor interface.
//!
//! Each pipeline step that calls out to a tool or service is a
//! `StageExecutor`: one async method with a closed set of failure kinds.
//! Executors are stateless between calls; everything a call needs arrives
//! in its input and the [`StageContext`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use hclip_media::{FfmpegRunner, MediaError};
use hclip_ml_client::MlError;
use hclip_models::{FailureKind, JobId, JobParameters};

/// Per-job context handed to every executor call.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: JobId,
    pub parameters: JobParameters,
    /// Scratch directory owned by the job
    pub work_dir: PathBuf,
    /// Fires when the job is deleted
    pub cancel: CancellationToken,
    /// Limit for one executor call
    pub timeout: Duration,
}

impl StageContext {
    /// FFmpeg runner bound to this job's cancellation and timeout.
    pub fn ffmpeg(&self) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_cancel(self.cancel.clone())
            .with_timeout(self.timeout)
    }
}

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    ExternalToolFailure,
    InvalidInput,
    Timeout,
    ResourceExhausted,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(FailureKind::from(*self).as_str())
    }
}

impl From<StageErrorKind> for FailureKind {
    fn from(kind: StageErrorKind) -> Self {
        match kind {
            StageErrorKind::ExternalToolFailure => FailureKind::ExternalToolFailure,
            StageErrorKind::InvalidInput => FailureKind::InvalidInput,
            StageErrorKind::Timeout => FailureKind::Timeout,
            StageErrorKind::ResourceExhausted => FailureKind::ResourceExhausted,
        }
    }
}

/// Failure of one executor call.
#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub detail: String,
}

impl StageError {
    pub fn new(kind: StageErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn external(detail: impl Into<String>) -> Self {
        Self::new(StageErrorKind::ExternalToolFailure, detail)
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::new(StageErrorKind::InvalidInput, detail)
    }

    pub fn resource_exhausted(detail: impl Into<String>) -> Self {
        Self::new(StageErrorKind::ResourceExhausted, detail)
    }
}

impl From<MediaError> for StageError {
    fn from(e: MediaError) -> Self {
        if e.is_input_error() {
            return StageError::invalid_input(e.to_string());
        }
        match &e {
            MediaError::Timeout(_) => StageError::new(StageErrorKind::Timeout, e.to_string()),
            MediaError::RateLimited(_) => StageError::resource_exhausted(e.to_string()),
            MediaError::FfmpegFailed { stderr: Some(stderr), .. }
                if stderr.contains("No space left on device") =>
            {
                StageError::resource_exhausted(format!("{}: disk full", e))
            }
            MediaError::FfmpegFailed {
                stderr: Some(stderr), ..
            } => {
                // Last stderr line is usually the actual cause
                let cause = stderr.lines().last().unwrap_or_default();
                StageError::external(format!("{}: {}", e, cause))
            }
            _ => StageError::external(e.to_string()),
        }
    }
}

impl From<MlError> for StageError {
    fn from(e: MlError) -> Self {
        match &e {
            MlError::RateLimited(_) => StageError::resource_exhausted(e.to_string()),
            MlError::Timeout(_) => StageError::new(StageErrorKind::Timeout, e.to_string()),
            _ => StageError::external(e.to_string()),
        }
    }
}

/// One long-running, cancellable step of the pipeline.
///
/// Implementations kill any external process when `ctx.cancel` fires and
/// return promptly.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Short name used in logs and failure messages.
    fn name(&self) -> &'static str;

    async fn execute(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError>;
}
