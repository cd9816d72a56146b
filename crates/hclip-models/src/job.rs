//! Job record and pipeline state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::{ClipArtifact, JobParameters, TranscriptionInfo, VideoMetadata};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is safe to use as a single path component.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline state of a job.
///
/// States are ordered; each non-failed state carries a fixed progress
/// checkpoint that is written when the job enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, waiting for an execution slot
    #[default]
    Pending,
    /// Fetching the source of a URL submission
    Downloading,
    /// Pre-flight validation of the source
    Processing,
    ExtractingAudio,
    Transcribing,
    Analyzing,
    Trimming,
    /// Only entered when captions were requested
    AddingCaptions,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Processing => "processing",
            JobState::ExtractingAudio => "extracting_audio",
            JobState::Transcribing => "transcribing",
            JobState::Analyzing => "analyzing",
            JobState::Trimming => "trimming",
            JobState::AddingCaptions => "adding_captions",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Progress written on entering this state. `Failed` has none; it keeps
    /// the checkpoint of the state the job failed in.
    pub fn checkpoint(&self) -> Option<u8> {
        match self {
            JobState::Pending => Some(0),
            JobState::Downloading => Some(2),
            JobState::Processing => Some(5),
            JobState::ExtractingAudio => Some(20),
            JobState::Transcribing => Some(45),
            JobState::Analyzing => Some(65),
            JobState::Trimming => Some(85),
            JobState::AddingCaptions => Some(95),
            JobState::Completed => Some(100),
            JobState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Processing)
            | (Pending, Downloading)
            | (Downloading, Processing)
            | (Processing, ExtractingAudio)
            | (ExtractingAudio, Transcribing)
            | (Transcribing, Analyzing)
            | (Analyzing, Trimming)
            | (Analyzing, Completed)
            | (Trimming, AddingCaptions)
            | (Trimming, Completed)
            | (AddingCaptions, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a terminal job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExternalToolFailure,
    InvalidInput,
    Timeout,
    ResourceExhausted,
    /// The process stopped while the job was in flight
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ExternalToolFailure => "external_tool_failure",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Timeout => "timeout",
            FailureKind::ResourceExhausted => "resource_exhausted",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure recorded on a job that ended in `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub kind: FailureKind,
    /// Human-readable cause
    pub message: String,
    /// State the job was in when it failed
    pub stage: JobState,
}

impl JobFailure {
    pub fn new(kind: FailureKind, stage: JobState, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage,
        }
    }
}

/// Intermediate artifacts, populated as stages complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Intermediate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_points_path: Option<PathBuf>,
}

/// Rejected mutation of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from} to {to}")]
    Illegal { from: JobState, to: JobState },

    #[error("job is already {0}")]
    Terminal(JobState),

    /// The writer's job was cancelled before the update could be applied
    #[error("job was cancelled")]
    Cancelled,
}

/// Durable state of one submitted video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobState,
    /// Progress 0-100, equal to the checkpoint of `status` unless failed
    pub progress: u8,
    pub parameters: JobParameters,
    /// Source video; for URL submissions, where the download is written
    pub source_path: PathBuf,
    /// Set for jobs submitted by URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Description of the current step
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VideoMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionInfo>,
    #[serde(default)]
    pub intermediate: Intermediate,
    #[serde(default)]
    pub clips: Vec<ClipArtifact>,
    /// Partial failures that did not fail the job
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a pending record.
    pub fn new(id: JobId, parameters: JobParameters, source_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobState::Pending,
            progress: 0,
            parameters,
            source_path: source_path.into(),
            source_url: None,
            message: "Waiting to start".to_string(),
            source: None,
            transcription: None,
            intermediate: Intermediate::default(),
            clips: Vec::new(),
            notes: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the record as a URL submission; the pipeline downloads the
    /// source to `source_path` first.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn check(&self, next: JobState) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        Ok(())
    }

    fn enter(&mut self, next: JobState, message: impl Into<String>) {
        self.status = next;
        if let Some(checkpoint) = next.checkpoint() {
            self.progress = self.progress.max(checkpoint);
        }
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    /// Move to a non-terminal state.
    pub fn advance(&mut self, next: JobState, message: impl Into<String>) -> Result<(), TransitionError> {
        if next.is_terminal() {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        self.check(next)?;
        self.enter(next, message);
        Ok(())
    }

    /// Finish successfully with the given clips.
    pub fn complete(
        &mut self,
        clips: Vec<ClipArtifact>,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check(JobState::Completed)?;
        self.clips = clips;
        self.enter(JobState::Completed, message);
        Ok(())
    }

    /// Finish with a failure. Progress stays at the last checkpoint.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), TransitionError> {
        self.check(JobState::Failed)?;
        self.message = failure.message.clone();
        self.error = Some(failure);
        self.clips.clear();
        self.status = JobState::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Fail a record left in flight by a previous process.
    pub fn interrupt(&mut self) -> Result<(), TransitionError> {
        let stage = self.status;
        self.fail(JobFailure::new(
            FailureKind::Interrupted,
            stage,
            format!("Processing was interrupted during {stage} by a restart"),
        ))
    }

    /// Record a partial failure that does not fail the job.
    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
        self.updated_at = Utc::now();
    }
}
