//! Job store metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Record writes by operation and outcome.
    pub const WRITES_TOTAL: &str = "hclip_job_store_writes_total";

    /// Record write latency in seconds by operation.
    pub const WRITE_SECONDS: &str = "hclip_job_store_write_seconds";

    /// Records failed at startup because they were left in flight.
    pub const INTERRUPTED_TOTAL: &str = "hclip_job_store_interrupted_total";
}

/// Record a persisted write.
pub fn record_write(operation: &'static str, success: bool, latency_secs: f64) {
    counter!(
        names::WRITES_TOTAL,
        "operation" => operation,
        "status" => if success { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(names::WRITE_SECONDS, "operation" => operation).record(latency_secs);
}

/// Record jobs reconciled to interrupted.
pub fn record_interrupted(count: usize) {
    counter!(names::INTERRUPTED_TOTAL).increment(count as u64);
}
