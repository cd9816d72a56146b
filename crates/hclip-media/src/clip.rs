//! Clip trimming.

use std::path::{Path, PathBuf};
use tracing::info;

use hclip_models::TimeRange;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Cut `range` out of `video` into an H.264/AAC MP4 at `output`.
pub async fn trim_clip(
    video: impl AsRef<Path>,
    output: impl AsRef<Path>,
    range: TimeRange,
    runner: &FfmpegRunner,
) -> MediaResult<PathBuf> {
    let video = video.as_ref();
    let output = output.as_ref();

    if !video.exists() {
        return Err(MediaError::FileNotFound(video.to_path_buf()));
    }
    if !range.start.is_finite() || !range.end.is_finite() || range.start < 0.0 || range.duration() <= 0.0 {
        return Err(MediaError::InvalidRange(format!(
            "{:.3}s - {:.3}s",
            range.start, range.end
        )));
    }
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(
        "Trimming clip: {} -> {} (start: {:.2}s, duration: {:.2}s)",
        video.display(),
        output.display(),
        range.start,
        range.duration()
    );

    let cmd = FfmpegCommand::new(video, output)
        .seek(range.start)
        .duration(range.duration())
        .video_codec("libx264")
        .preset("fast")
        .crf(23)
        .audio_codec("aac")
        .faststart();

    runner.run(&cmd).await?;

    Ok(output.to_path_buf())
}
