//! Highlight clip pipeline.
//!
//! This crate provides:
//! - The stage executor interface and its FFmpeg/ML implementations
//! - The pipeline orchestrator driving the job state machine
//! - A bounded job executor with per-job cancellation
//! - `JobService`, the submit/status/fetch/delete surface

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod stage;
pub mod stages;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::{Pipeline, PipelineSettings};
pub use service::{ClipFile, JobService};
pub use stage::{StageContext, StageError, StageErrorKind, StageExecutor};
pub use stages::Stages;
