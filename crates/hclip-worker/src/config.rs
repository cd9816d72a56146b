//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ALLOWED_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of job records and artifacts
    pub data_dir: PathBuf,
    /// Maximum jobs executing at once; the rest wait in `pending`
    pub max_concurrent_jobs: usize,
    /// Maximum FFmpeg renders in flight within one job
    pub max_parallel_renders: usize,
    /// Limit for a single stage invocation
    pub stage_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Longest accepted source video, in seconds
    pub max_video_duration: f64,
    /// Accepted upload extensions, lowercase without the dot
    pub allowed_extensions: Vec<String>,
    /// Largest accepted upload
    pub max_upload_bytes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_concurrent_jobs: 2,
            max_parallel_renders: 2,
            stage_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            max_video_duration: 3600.0,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_upload_bytes: 2 * 1024 * 1024 * 1024, // 2 GB
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("HCLIP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_concurrent_jobs: std::env::var("HCLIP_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            max_parallel_renders: std::env::var("HCLIP_MAX_PARALLEL_RENDERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_parallel_renders),
            stage_timeout: std::env::var("HCLIP_STAGE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_timeout),
            shutdown_timeout: std::env::var("HCLIP_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            max_video_duration: std::env::var("HCLIP_MAX_VIDEO_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_video_duration),
            allowed_extensions: std::env::var("HCLIP_ALLOWED_EXTENSIONS")
                .ok()
                .map(|s| parse_extensions(&s))
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.allowed_extensions),
            max_upload_bytes: std::env::var("HCLIP_MAX_UPLOAD_MB")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_upload_bytes),
        }
    }

    /// Directory holding one JSON record per job.
    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }

    /// Whether an upload with this extension is accepted (case-insensitive).
    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|e| *e == extension)
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
