//! Job-scoped artifact storage on the local filesystem.
//!
//! Layout under the store root:
//!
//! ```text
//! jobs/<job_id>/source.<ext>
//! jobs/<job_id>/work/audio.wav
//! jobs/<job_id>/work/transcript.json
//! jobs/<job_id>/work/key_points.json
//! jobs/<job_id>/clips/clip_00.mp4
//! jobs/<job_id>/clips/clip_00_captioned.mp4
//! ```
//!
//! Nothing is shared between jobs; deleting a job removes its directory.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use hclip_models::{ClipVariant, JobId};

use crate::error::{StorageError, StorageResult};
use crate::fs_utils::{move_file, write_atomic};

const JOBS_DIR: &str = "jobs";

/// Paths owned by a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    root: PathBuf,
}

impl JobPaths {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self, extension: &str) -> PathBuf {
        self.root.join(format!("source.{}", extension))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join("clips")
    }

    pub fn audio(&self) -> PathBuf {
        self.work_dir().join("audio.wav")
    }

    pub fn transcript(&self) -> PathBuf {
        self.work_dir().join("transcript.json")
    }

    pub fn key_points(&self) -> PathBuf {
        self.work_dir().join("key_points.json")
    }

    /// Output path of a rendered clip. Key point slots are numbered before
    /// failed trims are dropped, so the slot may differ from the final index.
    pub fn clip(&self, slot: usize, variant: ClipVariant) -> PathBuf {
        let name = match variant {
            ClipVariant::Plain => format!("clip_{:02}.mp4", slot),
            ClipVariant::Captioned => format!("clip_{:02}_captioned.mp4", slot),
        };
        self.clips_dir().join(name)
    }

    /// Whether `path` lies inside this job's directory.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
            && !path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }
}

/// Local artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(JOBS_DIR)).await?;
        info!("Artifact store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths for `id`. Rejects ids that are not a single safe path component.
    pub fn paths(&self, id: &JobId) -> StorageResult<JobPaths> {
        if !id.is_path_safe() {
            return Err(StorageError::invalid_key(id.as_str()));
        }
        Ok(JobPaths {
            root: self.root.join(JOBS_DIR).join(id.as_str()),
        })
    }

    /// Create the job's directory tree.
    pub async fn prepare(&self, id: &JobId) -> StorageResult<JobPaths> {
        let paths = self.paths(id)?;
        fs::create_dir_all(paths.work_dir()).await?;
        fs::create_dir_all(paths.clips_dir()).await?;
        Ok(paths)
    }

    /// Move an uploaded file into the job's directory as its source video.
    pub async fn import_source(&self, id: &JobId, upload: &Path, extension: &str) -> StorageResult<PathBuf> {
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StorageError::invalid_key(format!("extension {:?}", extension)));
        }
        let paths = self.prepare(id).await?;
        let dest = paths.source(&extension.to_ascii_lowercase());
        move_file(upload, &dest).await?;
        debug!(job_id = %id, "Imported source {} -> {}", upload.display(), dest.display());
        Ok(dest)
    }

    /// Size of a stored file, or `NotFound`.
    pub async fn file_size(&self, path: &Path) -> StorageResult<u64> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StorageError::not_found(path.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize `value` as JSON to `path` atomically.
    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &bytes).await
    }

    #[cfg(test)]
    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> StorageResult<T> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove every artifact of a job. Returns `false` if nothing was stored.
    pub async fn delete_job(&self, id: &JobId) -> StorageResult<bool> {
        let paths = self.paths(id)?;
        match fs::remove_dir_all(paths.root()).await {
            Ok(()) => {
                info!(job_id = %id, "Deleted job artifacts");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", paths.root().display(), e))),
        }
    }

    /// Ids of every job that has a directory in the store.
    pub async fn list_jobs(&self) -> StorageResult<Vec<JobId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.root.join(JOBS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => ids.push(JobId::from_string(name)),
                Err(name) => warn!("Skipping non UTF-8 job directory {:?}", name),
            }
        }
        Ok(ids)
    }
}
