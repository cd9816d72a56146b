//! Pipeline metrics.

use metrics::{counter, gauge, histogram};

use hclip_models::{FailureKind, JobState};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "hclip_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "hclip_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "hclip_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "hclip_jobs_cancelled_total";
    pub const JOBS_ACTIVE: &str = "hclip_jobs_active";
    pub const STAGE_DURATION_SECONDS: &str = "hclip_stage_duration_seconds";
    pub const CLIPS_RENDERED_TOTAL: &str = "hclip_clips_rendered_total";
    pub const CLIP_FAILURES_TOTAL: &str = "hclip_clip_failures_total";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed(clips: usize) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    counter!(names::CLIPS_RENDERED_TOTAL).increment(clips as u64);
}

pub fn record_job_failed(stage: JobState, kind: FailureKind) {
    counter!(
        names::JOBS_FAILED_TOTAL,
        "stage" => stage.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

/// Jobs queued or running in this process.
pub fn set_jobs_active(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

pub fn record_stage_duration(stage: JobState, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

/// A trim or caption render that was dropped without failing the job.
pub fn record_clip_failure(stage: JobState) {
    counter!(names::CLIP_FAILURES_TOTAL, "stage" => stage.as_str()).increment(1);
}
