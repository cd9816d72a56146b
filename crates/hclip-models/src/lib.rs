//! Shared data models for the HighlightClip backend.
//!
//! This crate provides Serde-serializable types for:
//! - Job records and the pipeline state machine
//! - Submission parameters and caption options
//! - Transcripts, key points and clip artifacts

pub mod analysis;
pub mod clip;
pub mod job;
pub mod params;
pub mod timestamp;
pub mod transcript;
pub mod video;

// Re-export common types
pub use analysis::{select_key_points, KeyPoint};
pub use clip::{ClipArtifact, ClipVariant, TimeRange};
pub use job::{FailureKind, Intermediate, JobFailure, JobId, JobRecord, JobState, TransitionError};
pub use params::{CaptionMode, CaptionStyle, JobParameters};
pub use transcript::{Transcript, TranscriptSegment, TranscriptionInfo, WordTimestamp};
pub use video::{RemoteVideoInfo, VideoMetadata};
