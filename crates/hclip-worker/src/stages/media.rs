//! FFmpeg-backed executors.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use hclip_media::{burn_captions, extract_audio, parse_source_url, probe_video, trim_clip, SourceDownloader};
use hclip_models::VideoMetadata;

use super::{AudioJob, DownloadJob, RenderJob};
use crate::stage::{StageContext, StageError, StageExecutor};

/// Fetches URL submissions over HTTP or with yt-dlp.
pub struct UrlDownloader {
    downloader: SourceDownloader,
}

impl UrlDownloader {
    pub fn new(downloader: SourceDownloader) -> Self {
        Self { downloader }
    }
}

#[async_trait]
impl StageExecutor for UrlDownloader {
    type Input = DownloadJob;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "download"
    }

    async fn execute(&self, job: DownloadJob, ctx: &StageContext) -> Result<PathBuf, StageError> {
        let url = parse_source_url(&job.url)?;
        let size = self
            .downloader
            .download(&url, &job.output, job.max_bytes, &ctx.cancel, ctx.timeout)
            .await?;
        debug!(job_id = %ctx.job_id, "Downloaded {} bytes to {}", size, job.output.display());
        Ok(job.output)
    }
}

/// Reads duration, resolution and audio presence with ffprobe.
pub struct FfprobeProber;

#[async_trait]
impl StageExecutor for FfprobeProber {
    type Input = PathBuf;
    type Output = VideoMetadata;

    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn execute(&self, source: PathBuf, ctx: &StageContext) -> Result<VideoMetadata, StageError> {
        let info = tokio::select! {
            info = probe_video(&source) => info?,
            _ = ctx.cancel.cancelled() => return Err(StageError::external("probe cancelled")),
        };
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(
            job_id = %ctx.job_id,
            "Probed {}: {:.1}s {}x{} audio={}",
            filename, info.duration, info.width, info.height, info.has_audio
        );
        Ok(info.to_metadata(filename))
    }
}

/// Extracts 16 kHz mono WAV audio.
pub struct FfmpegAudioExtractor;

#[async_trait]
impl StageExecutor for FfmpegAudioExtractor {
    type Input = AudioJob;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "audio extraction"
    }

    async fn execute(&self, job: AudioJob, ctx: &StageContext) -> Result<PathBuf, StageError> {
        Ok(extract_audio(&job.source, &job.output, &ctx.ffmpeg()).await?)
    }
}

/// Trims clips and burns captions.
pub struct FfmpegClipRenderer;

#[async_trait]
impl StageExecutor for FfmpegClipRenderer {
    type Input = RenderJob;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "clip render"
    }

    async fn execute(&self, job: RenderJob, ctx: &StageContext) -> Result<PathBuf, StageError> {
        let runner = ctx.ffmpeg();
        let output = match job {
            RenderJob::Trim { source, range, output } => trim_clip(&source, &output, range, &runner).await?,
            RenderJob::Caption { clip, output, request } => {
                burn_captions(&clip, &output, &request, &runner).await?
            }
        };
        Ok(output)
    }
}
