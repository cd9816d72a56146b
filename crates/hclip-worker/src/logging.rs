//! Structured job logging utilities.
//!
//! Every pipeline run logs through a `JobLogger` so lifecycle events carry
//! the same `job_id` and `stage` fields.

use std::time::Duration;

use tracing::{error, info, warn, Span};

use hclip_models::{JobFailure, JobId, JobState};

/// Job logger for structured pipeline logging.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.clone(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Span wrapping a whole pipeline run.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id)
    }

    pub fn log_start(&self, source: &str) {
        info!(job_id = %self.job_id, "Job started: {}", source);
    }

    pub fn log_stage(&self, stage: JobState, message: &str) {
        info!(job_id = %self.job_id, stage = %stage, "{}", message);
    }

    pub fn log_stage_finished(&self, stage: JobState, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage finished"
        );
    }

    /// A partial failure that does not fail the job.
    pub fn log_note(&self, stage: JobState, note: &str) {
        warn!(job_id = %self.job_id, stage = %stage, "Partial failure: {}", note);
    }

    pub fn log_failure(&self, failure: &JobFailure) {
        error!(
            job_id = %self.job_id,
            stage = %failure.stage,
            kind = %failure.kind,
            "Job failed: {}", failure.message
        );
    }

    pub fn log_cancelled(&self) {
        info!(job_id = %self.job_id, "Job cancelled");
    }

    pub fn log_completion(&self, clips: usize, notes: usize) {
        info!(
            job_id = %self.job_id,
            clips,
            notes,
            "Job completed"
        );
    }
}
