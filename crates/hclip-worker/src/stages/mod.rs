//! Production stage executors and the bundle the pipeline runs with.

use std::path::PathBuf;
use std::sync::Arc;

use hclip_media::{CaptionRequest, SourceDownloader};
use hclip_ml_client::{AnalysisClient, TranscriptionClient};
use hclip_models::{KeyPoint, TimeRange, Transcript, VideoMetadata};

use crate::error::{WorkerError, WorkerResult};
use crate::stage::StageExecutor;

pub mod media;
pub mod ml;

pub use media::{FfmpegAudioExtractor, FfmpegClipRenderer, FfprobeProber, UrlDownloader};
pub use ml::{GeminiAnalyzer, WhisperTranscriber};

/// Download of a URL submission into the job directory.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub output: PathBuf,
    pub max_bytes: u64,
}

/// Audio extraction request.
#[derive(Debug, Clone)]
pub struct AudioJob {
    pub source: PathBuf,
    pub output: PathBuf,
}

/// Key point analysis request.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub transcript: Arc<Transcript>,
    pub max_clips: u32,
    pub min_clip_duration: f64,
    pub max_clip_duration: f64,
}

/// One render sub-operation.
#[derive(Debug, Clone)]
pub enum RenderJob {
    /// Cut `range` out of the source video
    Trim {
        source: PathBuf,
        range: TimeRange,
        output: PathBuf,
    },
    /// Burn captions into an already trimmed clip
    Caption {
        clip: PathBuf,
        output: PathBuf,
        request: CaptionRequest,
    },
}

pub type Downloader = dyn StageExecutor<Input = DownloadJob, Output = PathBuf>;
pub type Prober = dyn StageExecutor<Input = PathBuf, Output = VideoMetadata>;
pub type AudioExtractor = dyn StageExecutor<Input = AudioJob, Output = PathBuf>;
pub type Transcriber = dyn StageExecutor<Input = PathBuf, Output = Transcript>;
pub type Analyzer = dyn StageExecutor<Input = AnalysisJob, Output = Vec<KeyPoint>>;
pub type ClipRenderer = dyn StageExecutor<Input = RenderJob, Output = PathBuf>;

/// The executors a pipeline runs with.
#[derive(Clone)]
pub struct Stages {
    pub downloader: Arc<Downloader>,
    pub prober: Arc<Prober>,
    pub audio: Arc<AudioExtractor>,
    pub transcriber: Arc<Transcriber>,
    pub analyzer: Arc<Analyzer>,
    pub renderer: Arc<ClipRenderer>,
}

impl Stages {
    /// FFmpeg and yt-dlp for media work, the given clients for
    /// transcription and analysis.
    pub fn production(transcription: TranscriptionClient, analysis: AnalysisClient) -> WorkerResult<Self> {
        let downloader = SourceDownloader::new().map_err(|e| WorkerError::config_error(e.to_string()))?;
        Ok(Self {
            downloader: Arc::new(UrlDownloader::new(downloader)),
            prober: Arc::new(FfprobeProber),
            audio: Arc::new(FfmpegAudioExtractor),
            transcriber: Arc::new(WhisperTranscriber::new(transcription)),
            analyzer: Arc::new(GeminiAnalyzer::new(analysis)),
            renderer: Arc::new(FfmpegClipRenderer),
        })
    }
}
