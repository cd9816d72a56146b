//! Audio extraction for transcription.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Sample rate expected by speech-to-text engines.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

/// Extract the audio track of `video` as 16 kHz mono PCM WAV.
pub async fn extract_audio(
    video: impl AsRef<Path>,
    output: impl AsRef<Path>,
    runner: &FfmpegRunner,
) -> MediaResult<PathBuf> {
    let video = video.as_ref();
    let output = output.as_ref();

    if !video.exists() {
        return Err(MediaError::FileNotFound(video.to_path_buf()));
    }
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!("Extracting audio: {} -> {}", video.display(), output.display());

    let cmd = FfmpegCommand::new(video, output)
        .no_video()
        .audio_codec("pcm_s16le")
        .audio_sample_rate(TRANSCRIPTION_SAMPLE_RATE)
        .audio_channels(1);

    runner.run(&cmd).await?;

    if !output.exists() {
        return Err(MediaError::ffmpeg_failed("FFmpeg produced no audio output", None, None));
    }

    Ok(output.to_path_buf())
}
