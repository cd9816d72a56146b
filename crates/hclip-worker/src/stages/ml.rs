//! Executors backed by the transcription and analysis services.

use std::path::PathBuf;

use async_trait::async_trait;

use hclip_ml_client::{AnalysisClient, AnalysisRequest, TranscriptionClient};
use hclip_models::{KeyPoint, Transcript};

use super::AnalysisJob;
use crate::stage::{StageContext, StageError, StageExecutor};

/// Speech-to-text through an OpenAI-compatible Whisper server.
pub struct WhisperTranscriber {
    client: TranscriptionClient,
}

impl WhisperTranscriber {
    pub fn new(client: TranscriptionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageExecutor for WhisperTranscriber {
    type Input = PathBuf;
    type Output = Transcript;

    fn name(&self) -> &'static str {
        "transcription"
    }

    async fn execute(&self, audio: PathBuf, ctx: &StageContext) -> Result<Transcript, StageError> {
        tokio::select! {
            result = self.client.transcribe(&audio) => Ok(result?),
            _ = ctx.cancel.cancelled() => Err(StageError::external("transcription cancelled")),
        }
    }
}

/// Key point extraction through Gemini.
pub struct GeminiAnalyzer {
    client: AnalysisClient,
}

impl GeminiAnalyzer {
    pub fn new(client: AnalysisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageExecutor for GeminiAnalyzer {
    type Input = AnalysisJob;
    type Output = Vec<KeyPoint>;

    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn execute(&self, job: AnalysisJob, ctx: &StageContext) -> Result<Vec<KeyPoint>, StageError> {
        let request = AnalysisRequest {
            transcript: &job.transcript,
            max_clips: job.max_clips,
            min_duration: job.min_clip_duration,
            max_duration: job.max_clip_duration,
        };
        tokio::select! {
            result = self.client.extract_key_points(request) => Ok(result?),
            _ = ctx.cancel.cancelled() => Err(StageError::external("analysis cancelled")),
        }
    }
}
