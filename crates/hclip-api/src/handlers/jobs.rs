//! Job handlers: submit, poll, download clips and delete.

use std::path::{Path as FsPath, PathBuf};

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use hclip_models::{
    ClipArtifact, ClipVariant, JobFailure, JobId, JobParameters, JobRecord, JobState, RemoteVideoInfo,
    TranscriptionInfo, VideoMetadata,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Clip as exposed to clients; file paths stay server-side.
#[derive(Debug, Serialize)]
pub struct ClipResponse {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub title: String,
    pub summary: String,
    pub importance: u8,
    pub has_captions: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captioned_url: Option<String>,
}

impl ClipResponse {
    fn new(job_id: &JobId, clip: &ClipArtifact) -> Self {
        // Downloads default to the captioned variant
        let base = format!("/api/v1/jobs/{}/clips/{}", job_id, clip.index);
        let url = format!("{}?captioned=false", base);
        let captioned_url = clip.captioned_path.as_ref().map(|_| base);
        Self {
            index: clip.index,
            start: clip.time_range.start,
            end: clip.time_range.end,
            duration: clip.duration(),
            title: clip.title.clone(),
            summary: clip.summary.clone(),
            importance: clip.importance,
            has_captions: captioned_url.is_some(),
            url,
            captioned_url,
        }
    }
}

/// Job status response.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: JobState,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub message: String,
    pub parameters: JobParameters,
    /// Submitted URL, for jobs not created from an upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<VideoMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionInfo>,
    pub clips: Vec<ClipResponse>,
    /// Clips or captions that were skipped without failing the job
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobResponse {
    fn from(record: JobRecord) -> Self {
        let clips = record.clips.iter().map(|c| ClipResponse::new(&record.id, c)).collect();
        Self {
            job_id: record.id.to_string(),
            status: record.status,
            progress: record.progress,
            message: record.message,
            parameters: record.parameters,
            source_url: record.source_url,
            source: record.source,
            transcription: record.transcription,
            clips,
            notes: record.notes,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Query parameters for clip downloads.
#[derive(Debug, Deserialize)]
pub struct ClipQuery {
    /// Serve the captioned variant when one exists.
    #[serde(default = "default_true")]
    pub captioned: bool,
}

fn default_true() -> bool {
    true
}

/// JSON body of a URL submission; parameter fields sit next to `url`.
#[derive(Debug, Deserialize)]
pub struct SubmitUrlRequest {
    pub url: String,
    #[serde(flatten)]
    pub parameters: JobParameters,
}

#[derive(Debug, Deserialize)]
pub struct VideoInfoQuery {
    pub url: String,
}

/// Upload written to a temporary file while the multipart body streams in.
struct StagedUpload {
    path: PathBuf,
    filename: String,
    size: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/jobs
///
/// Multipart form with a `file` part and optional parameter fields
/// (`max_clips`, `min_clip_duration`, `max_clip_duration`,
/// `include_captions`, `caption_style`, `caption_mode`).
///
/// Returns:
/// - 202: Job accepted, in `pending`
/// - 400: Missing file, bad parameters or unsupported file
/// - 503: Server is shutting down
pub async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let mut staged: Option<StagedUpload> = None;
    let result = read_submission(&state, multipart, &mut staged).await;

    let outcome = match result {
        Ok(parameters) => match &staged {
            Some(upload) => {
                info!("Received upload {} ({} bytes)", upload.filename, upload.size);
                state
                    .service
                    .submit(parameters, &upload.path, &upload.filename)
                    .await
                    .map_err(ApiError::from)
            }
            None => Err(ApiError::bad_request("Missing 'file' field")),
        },
        Err(e) => Err(e),
    };

    // A successful submit moved the file into the job directory
    if let Some(upload) = staged {
        discard(&upload.path).await;
    }

    let record = outcome?;
    Ok((StatusCode::ACCEPTED, Json(record.into())))
}

/// POST /api/v1/process-url
///
/// JSON body with a YouTube, Shorts or direct video `url` and the same
/// optional parameters as an upload. The job downloads the video before
/// processing it.
///
/// Returns:
/// - 202: Job accepted, in `pending`
/// - 400: Bad URL or parameters
/// - 503: Server is shutting down
pub async fn submit_url(
    State(state): State<AppState>,
    Json(request): Json<SubmitUrlRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let record = state.service.submit_url(request.parameters, &request.url).await?;
    Ok((StatusCode::ACCEPTED, Json(record.into())))
}

/// GET /api/v1/video-info?url=...
///
/// Looks up title, duration and uploader without downloading. Returns 400
/// for URLs the video host rejects.
pub async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<VideoInfoQuery>,
) -> ApiResult<Json<RemoteVideoInfo>> {
    let info = state.service.video_info(&query.url).await?;
    Ok(Json(info))
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobResponse>> {
    let jobs = state.service.list().await;
    Json(jobs.into_iter().map(JobResponse::from).collect())
}

/// GET /api/v1/jobs/:job_id
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<JobResponse>> {
    let id = parse_job_id(&job_id)?;
    let record = state.service.status(&id).await?;
    Ok(Json(record.into()))
}

/// GET /api/v1/jobs/:job_id/clips/:index?captioned=bool (default true)
///
/// Streams the MP4. Returns 409 while the job is still running and 404 for
/// failed jobs or unknown indices.
pub async fn download_clip(
    State(state): State<AppState>,
    Path((job_id, index)): Path<(String, usize)>,
    Query(query): Query<ClipQuery>,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    let clip = state.service.fetch_clip(&id, index, query.captioned).await?;

    let file = tokio::fs::File::open(&clip.path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found(format!("Clip {} not found for job {}", index, id))
        } else {
            ApiError::from(e)
        }
    })?;

    let suffix = match clip.variant {
        ClipVariant::Captioned => "_captioned",
        ClipVariant::Plain => "",
    };
    let disposition = format!("attachment; filename=\"{}_clip_{:02}{}.mp4\"", id, index, suffix);

    let headers = [
        (header::CONTENT_TYPE, "video/mp4".to_string()),
        (header::CONTENT_LENGTH, clip.size.to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// DELETE /api/v1/jobs/:job_id
///
/// Cancels the job if it is queued or running, then removes its record and
/// every artifact.
pub async fn delete_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<StatusCode> {
    let id = parse_job_id(&job_id)?;
    state.service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    let id = JobId::from_string(raw);
    if !id.is_path_safe() {
        return Err(ApiError::not_found(format!("Job not found: {}", raw)));
    }
    Ok(id)
}

async fn read_submission(
    state: &AppState,
    mut multipart: Multipart,
    staged: &mut Option<StagedUpload>,
) -> ApiResult<JobParameters> {
    let mut parameters = JobParameters::default();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            if staged.is_some() {
                return Err(ApiError::bad_request("Only one 'file' field is allowed"));
            }
            let filename = field
                .file_name()
                .map(str::to_string)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| ApiError::bad_request("The 'file' field needs a filename"))?;

            let path = state.upload_dir.join(format!("{}.upload", Uuid::new_v4()));
            let mut file = tokio::fs::File::create(&path).await?;
            // Register before writing so a failed stream still gets cleaned up
            *staged = Some(StagedUpload {
                path: path.clone(),
                filename,
                size: 0,
            });

            let mut size = 0u64;
            while let Some(chunk) = field.chunk().await? {
                file.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            file.flush().await?;
            if let Some(upload) = staged.as_mut() {
                upload.size = size;
            }
        } else {
            let value = field.text().await?;
            apply_field(&mut parameters, &name, value.trim())?;
        }
    }

    Ok(parameters)
}

fn apply_field(parameters: &mut JobParameters, name: &str, value: &str) -> ApiResult<()> {
    fn parse<T: std::str::FromStr>(name: &str, value: &str) -> ApiResult<T> {
        value
            .parse()
            .map_err(|_| ApiError::bad_request(format!("Invalid value for '{}': {:?}", name, value)))
    }

    match name {
        "max_clips" => parameters.max_clips = parse(name, value)?,
        "min_clip_duration" => parameters.min_clip_duration = parse(name, value)?,
        "max_clip_duration" => parameters.max_clip_duration = parse(name, value)?,
        "include_captions" => parameters.include_captions = parse_bool(value)?,
        "caption_style" => parameters.caption_style = value.parse().map_err(ApiError::bad_request)?,
        "caption_mode" => parameters.caption_mode = value.parse().map_err(ApiError::bad_request)?,
        other => warn!("Ignoring unknown form field {:?}", other),
    }
    Ok(())
}

fn parse_bool(value: &str) -> ApiResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ApiError::bad_request(format!(
            "Invalid value for 'include_captions': {:?}",
            value
        ))),
    }
}

async fn discard(path: &FsPath) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staged upload {}: {}", path.display(), e),
    }
}
