//! FFmpeg and yt-dlp wrappers for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts via `CancellationToken`
//! - Probing, audio extraction, trimming and caption burning
//! - Downloading URL submissions over HTTP or through yt-dlp

pub mod audio;
pub mod captions;
pub mod clip;
pub mod command;
pub mod download;
pub mod error;
pub mod probe;
pub mod progress;

pub use audio::extract_audio;
pub use captions::{burn_captions, generate_ass, CaptionColors, CaptionRequest};
pub use clip::trim_clip;
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use download::{
    check_ytdlp, classify_url, fetch_video_info, parse_source_url, source_extension, SourceDownloader,
    SourceKind,
};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
