//! Job service: the surface the HTTP layer talks to.
//!
//! Owns both the job store and the artifact store, so it is the one place
//! that keeps them consistent on submit and delete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use validator::Validate;

use hclip_jobs::JobStore;
use hclip_media::{fetch_video_info, parse_source_url, source_extension};
use hclip_models::{ClipVariant, JobId, JobParameters, JobRecord, JobState, RemoteVideoInfo};
use hclip_storage::{ArtifactStore, StorageError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::JobExecutor;
use crate::metrics;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::stages::Stages;

/// Limit for a video info lookup.
const VIDEO_INFO_TIMEOUT: Duration = Duration::from_secs(60);

/// A rendered clip file ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipFile {
    pub path: PathBuf,
    pub variant: ClipVariant,
    pub size: u64,
}

pub struct JobService {
    config: WorkerConfig,
    store: Arc<JobStore>,
    artifacts: ArtifactStore,
    executor: JobExecutor,
}

impl JobService {
    /// Open the stores under `config.data_dir`, mark jobs left in flight by
    /// a previous process as interrupted and start the executor.
    pub async fn start(config: WorkerConfig, stages: Stages) -> WorkerResult<Self> {
        let artifacts = ArtifactStore::open(config.data_dir.clone()).await?;
        let store = Arc::new(JobStore::open(config.records_dir()).await?);

        let interrupted = store.reconcile_interrupted().await?;
        if !interrupted.is_empty() {
            warn!("{} jobs were interrupted by the previous shutdown", interrupted.len());
        }

        // Directories without a record are left over from an unfinished delete
        for id in artifacts.list_jobs().await? {
            if store.contains(&id).await {
                continue;
            }
            info!(job_id = %id, "Removing orphaned job artifacts");
            if let Err(e) = artifacts.delete_job(&id).await {
                warn!(job_id = %id, "Failed to remove orphaned artifacts: {}", e);
            }
        }

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&store),
            artifacts.clone(),
            stages,
            PipelineSettings::from(&config),
        ));
        let executor = JobExecutor::new(pipeline, config.max_concurrent_jobs);

        Ok(Self {
            config,
            store,
            artifacts,
            executor,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.executor.is_shutting_down()
    }

    /// Jobs queued or running in this process.
    pub async fn active_jobs(&self) -> usize {
        self.executor.active_jobs().await
    }

    /// Accept an uploaded video and schedule it.
    ///
    /// The upload is moved into the job's directory. Invalid parameters, an
    /// unsupported extension or a bad file size are rejected before any job
    /// exists.
    pub async fn submit(&self, parameters: JobParameters, upload: &Path, filename: &str) -> WorkerResult<JobRecord> {
        self.check_submission(&parameters)?;

        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.config.is_allowed_extension(&extension) {
            return Err(WorkerError::validation(format!(
                "Unsupported file type for {:?}. Allowed: {}",
                filename,
                self.config.allowed_extensions.join(", ")
            )));
        }

        let size = tokio::fs::metadata(upload).await?.len();
        if size == 0 {
            return Err(WorkerError::validation("Uploaded file is empty"));
        }
        if size > self.config.max_upload_bytes {
            return Err(WorkerError::validation(format!(
                "File is {} MB, the limit is {} MB",
                size / (1024 * 1024),
                self.config.max_upload_bytes / (1024 * 1024)
            )));
        }

        let id = JobId::new();
        let source = self.artifacts.import_source(&id, upload, &extension).await?;
        let record = self.schedule(JobRecord::new(id.clone(), parameters, source)).await?;

        info!(job_id = %id, "Submitted {} ({} bytes)", filename, size);
        Ok(record)
    }

    /// Accept a video URL and schedule it. The download runs as the job's
    /// first stage.
    pub async fn submit_url(&self, parameters: JobParameters, url: &str) -> WorkerResult<JobRecord> {
        self.check_submission(&parameters)?;
        let url = parse_source_url(url).map_err(|e| WorkerError::validation(e.to_string()))?;

        let id = JobId::new();
        let paths = self.artifacts.prepare(&id).await?;
        let source = paths.source(source_extension(&url));
        let record = JobRecord::new(id.clone(), parameters, source).with_source_url(url.as_str());
        let record = self.schedule(record).await?;

        info!(job_id = %id, "Submitted {}", url);
        Ok(record)
    }

    /// Title, duration and uploader of a video URL, without creating a job.
    pub async fn video_info(&self, url: &str) -> WorkerResult<RemoteVideoInfo> {
        let url = parse_source_url(url).map_err(|e| WorkerError::validation(e.to_string()))?;
        match fetch_video_info(&url, VIDEO_INFO_TIMEOUT).await {
            Ok(info) => Ok(info),
            Err(e) if e.is_input_error() => Err(WorkerError::validation(format!("Failed to get video info: {}", e))),
            Err(e) => Err(e.into()),
        }
    }

    fn check_submission(&self, parameters: &JobParameters) -> WorkerResult<()> {
        if self.executor.is_shutting_down() {
            return Err(WorkerError::ShuttingDown);
        }
        parameters
            .validate()
            .map_err(|e| WorkerError::validation(format!("Invalid parameters: {}", e)))
    }

    /// Persist `record` and queue it. On failure the job leaves nothing
    /// behind.
    async fn schedule(&self, record: JobRecord) -> WorkerResult<JobRecord> {
        let id = record.id.clone();
        let record = match self.store.insert(record).await {
            Ok(record) => record,
            Err(e) => {
                let _ = self.artifacts.delete_job(&id).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.executor.submit(id.clone()).await {
            let _ = self.store.delete(&id).await;
            let _ = self.artifacts.delete_job(&id).await;
            return Err(e);
        }

        metrics::record_job_submitted();
        Ok(record)
    }

    pub async fn status(&self, id: &JobId) -> WorkerResult<JobRecord> {
        Ok(self.store.get(id).await?)
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.store.list().await
    }

    /// Resolve clip `index` of a completed job. Asking for the captioned
    /// variant of a clip without one returns the plain file.
    pub async fn fetch_clip(&self, id: &JobId, index: usize, captioned: bool) -> WorkerResult<ClipFile> {
        let record = self.store.get(id).await?;
        let not_found = || WorkerError::ClipNotFound {
            job_id: id.clone(),
            index,
        };

        match record.status {
            JobState::Completed => {}
            JobState::Failed => return Err(not_found()),
            status => {
                return Err(WorkerError::NotReady {
                    job_id: id.clone(),
                    status,
                })
            }
        }

        let clip = record.clips.get(index).ok_or_else(not_found)?;
        let variant = if captioned && clip.captioned_path.is_some() {
            ClipVariant::Captioned
        } else {
            ClipVariant::Plain
        };
        let path = clip.path_for(variant).ok_or_else(not_found)?.to_path_buf();
        if !self.artifacts.paths(id)?.contains(&path) {
            warn!(job_id = %id, "Clip path {} is outside the job directory", path.display());
            return Err(not_found());
        }

        let size = match self.artifacts.file_size(&path).await {
            Ok(size) => size,
            Err(StorageError::NotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        Ok(ClipFile { path, variant, size })
    }

    /// Delete a job: cancel it if it is queued or running, wait for its
    /// stages to stop, then remove its artifacts and record.
    pub async fn delete(&self, id: &JobId) -> WorkerResult<()> {
        if !self.store.contains(id).await {
            return Err(WorkerError::NotFound(id.clone()));
        }

        if self.executor.cancel_and_wait(id).await {
            info!(job_id = %id, "Cancelled in-flight job");
        }
        self.artifacts.delete_job(id).await?;
        self.store.delete(id).await?;

        info!(job_id = %id, "Deleted job");
        Ok(())
    }

    /// Stop admitting jobs and wait for running ones, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        self.executor.shutdown(self.config.shutdown_timeout).await
    }
}
