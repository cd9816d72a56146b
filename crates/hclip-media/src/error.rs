//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("No audio stream in {0}")]
    NoAudioStream(PathBuf),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid video URL: {0}")]
    InvalidUrl(String),

    #[error("Download is {size} bytes, the limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("Rate limited by the video host: {0}")]
    RateLimited(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an invalid video error.
    pub fn invalid_video(message: impl Into<String>) -> Self {
        Self::InvalidVideo(message.into())
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed(message.into())
    }

    /// Whether the failure is caused by the input rather than the tool.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MediaError::FileNotFound(_)
                | MediaError::InvalidVideo(_)
                | MediaError::NoAudioStream(_)
                | MediaError::InvalidRange(_)
                | MediaError::InvalidUrl(_)
                | MediaError::TooLarge { .. }
        )
    }
}
