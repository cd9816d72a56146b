//! Source video download.
//!
//! Links to video files are streamed over HTTP; everything else (YouTube,
//! Shorts and the other sites yt-dlp understands) goes through yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use hclip_models::RemoteVideoInfo;

use crate::command::remove_partial_output;
use crate::error::{MediaError, MediaResult};

/// Format selector capping downloads at 480p to keep processing cheap.
const YTDLP_FORMAT: &str =
    "bestvideo[height<=480][ext=mp4]+bestaudio[ext=m4a]/best[height<=480][ext=mp4]/best[height<=480]/best";

/// Extensions treated as direct links to a video file.
const DIRECT_EXTENSIONS: [&str; 6] = ["mp4", "mov", "avi", "mkv", "webm", "m4v"];

/// Where a submitted URL points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    YouTube,
    YouTubeShorts,
    /// A link to a video file
    Direct,
    /// Any other page; left to yt-dlp's extractors
    Other,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::YouTubeShorts => "youtube_shorts",
            SourceKind::Direct => "direct",
            SourceKind::Other => "other",
        }
    }
}

/// Parse a submitted URL. Only absolute http(s) URLs with a host are accepted.
pub fn parse_source_url(raw: &str) -> MediaResult<Url> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|e| MediaError::InvalidUrl(format!("{:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(MediaError::InvalidUrl(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(MediaError::InvalidUrl(format!("{:?} has no host", raw)));
    }
    Ok(url)
}

pub fn classify_url(url: &Url) -> SourceKind {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let host = host.strip_prefix("m.").unwrap_or(host);

    if host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com") {
        if url.path().starts_with("/shorts/") {
            return SourceKind::YouTubeShorts;
        }
        return SourceKind::YouTube;
    }
    if direct_extension(url).is_some() {
        return SourceKind::Direct;
    }
    SourceKind::Other
}

fn direct_extension(url: &Url) -> Option<&'static str> {
    let path = url.path().to_ascii_lowercase();
    let (_, extension) = path.rsplit_once('.')?;
    DIRECT_EXTENSIONS.iter().copied().find(|e| *e == extension)
}

/// Extension of the file a download of `url` produces. yt-dlp output is
/// merged into MP4.
pub fn source_extension(url: &Url) -> &'static str {
    match classify_url(url) {
        SourceKind::Direct => direct_extension(url).unwrap_or("mp4"),
        _ => "mp4",
    }
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}

/// Downloads submitted URLs into a job's directory.
#[derive(Debug, Clone)]
pub struct SourceDownloader {
    http: reqwest::Client,
}

impl SourceDownloader {
    pub fn new() -> MediaResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MediaError::download_failed(format!("HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Download `url` to `output` and return the file size.
    ///
    /// Stops when `cancel` fires or `timeout` elapses, removing the partial
    /// file. Downloads larger than `max_bytes` are rejected.
    pub async fn download(
        &self,
        url: &Url,
        output: &Path,
        max_bytes: u64,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> MediaResult<u64> {
        let kind = classify_url(url);
        info!("Downloading {} source {} to {}", kind.as_str(), url, output.display());

        let fetch = async {
            match kind {
                SourceKind::Direct => self.fetch_direct(url, output, max_bytes).await,
                _ => fetch_with_ytdlp(url, output, max_bytes).await,
            }
        };
        let result = tokio::select! {
            result = tokio::time::timeout(timeout, fetch) => {
                result.unwrap_or(Err(MediaError::Timeout(timeout.as_secs())))
            }
            _ = cancel.cancelled() => Err(MediaError::Cancelled),
        };

        match result {
            Ok(size) => {
                info!("Downloaded {} ({:.1} MB)", url, size as f64 / (1024.0 * 1024.0));
                Ok(size)
            }
            Err(e) => {
                remove_partial_output(output).await;
                remove_partial_output(&partial_path(output)).await;
                Err(e)
            }
        }
    }

    async fn fetch_direct(&self, url: &Url, output: &Path, max_bytes: u64) -> MediaResult<u64> {
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| MediaError::download_failed(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(MediaError::InvalidUrl(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(MediaError::download_failed(format!("{} returned {}", url, status)));
        }
        if let Some(size) = response.content_length().filter(|len| *len > max_bytes) {
            return Err(MediaError::TooLarge { size, limit: max_bytes });
        }

        let mut file = tokio::fs::File::create(output).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MediaError::download_failed(e.to_string()))?
        {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(MediaError::TooLarge {
                    size: written,
                    limit: max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(MediaError::InvalidUrl(format!("{} returned an empty body", url)));
        }
        Ok(written)
    }
}

/// yt-dlp's in-progress file for `output`.
fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn ytdlp_download_args(url: &Url, output: &Path, max_bytes: u64) -> Vec<String> {
    [
        "--no-playlist",
        "--no-progress",
        "--no-warnings",
        "-f",
        YTDLP_FORMAT,
        "--merge-output-format",
        "mp4",
        "--max-filesize",
    ]
    .iter()
    .map(|a| a.to_string())
    .chain([
        max_bytes.to_string(),
        "-o".to_string(),
        output.to_string_lossy().to_string(),
        "--".to_string(),
        url.to_string(),
    ])
    .collect()
}

async fn fetch_with_ytdlp(url: &Url, output: &Path, max_bytes: u64) -> MediaResult<u64> {
    check_ytdlp()?;
    let args = ytdlp_download_args(url, output, max_bytes);
    debug!("Running yt-dlp {}", args.join(" "));

    let result = Command::new("yt-dlp")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !result.status.success() {
        return Err(ytdlp_failure(&String::from_utf8_lossy(&result.stderr)));
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // yt-dlp skips files over --max-filesize and still exits 0
            let stdout = String::from_utf8_lossy(&result.stdout);
            if stdout.contains("larger than max-filesize") {
                return Err(MediaError::InvalidUrl(format!(
                    "{} is larger than the {} MB limit",
                    url,
                    max_bytes / (1024 * 1024)
                )));
            }
            Err(MediaError::download_failed("yt-dlp did not produce a file"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Classify a failed yt-dlp run by its stderr.
fn ytdlp_failure(stderr: &str) -> MediaError {
    let cause = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .to_string();

    if stderr.contains("429") || stderr.contains("Too Many Requests") || stderr.contains("Sign in to confirm") {
        warn!("Video host is rate limiting downloads");
        return MediaError::RateLimited(cause);
    }

    let input_errors = [
        "Unsupported URL",
        "Video unavailable",
        "Private video",
        "is not a valid URL",
        "HTTP Error 404",
        "This video has been removed",
    ];
    if input_errors.iter().any(|m| stderr.contains(m)) {
        return MediaError::InvalidUrl(cause);
    }
    MediaError::download_failed(format!("yt-dlp failed: {}", cause))
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    description: Option<String>,
}

fn parse_video_info(stdout: &[u8]) -> MediaResult<RemoteVideoInfo> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)?;
    Ok(RemoteVideoInfo {
        title: info.title.unwrap_or_else(|| "Unknown".to_string()),
        duration: info.duration.unwrap_or(0.0),
        uploader: info.uploader.unwrap_or_else(|| "Unknown".to_string()),
        thumbnail: info.thumbnail,
        description: info.description.unwrap_or_default(),
    })
}

/// Look up title, duration and uploader of `url` without downloading it.
pub async fn fetch_video_info(url: &Url, timeout: Duration) -> MediaResult<RemoteVideoInfo> {
    check_ytdlp()?;

    let lookup = Command::new("yt-dlp")
        .args(["--dump-single-json", "--skip-download", "--no-playlist", "--no-warnings", "--"])
        .arg(url.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| MediaError::Timeout(timeout.as_secs()))??;

    if !output.status.success() {
        return Err(ytdlp_failure(&String::from_utf8_lossy(&output.stderr)));
    }
    parse_video_info(&output.stdout)
}
