//! Durable keyed store of job records.
//!
//! Every record lives in memory behind its own lock and on disk as
//! `<dir>/<id>.json`. An update clones the record, applies the mutator,
//! writes the clone to disk and only then replaces the in-memory copy, so a
//! reader never sees a state that was not persisted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use hclip_models::{JobId, JobParameters, JobRecord, TransitionError};
use hclip_storage::write_atomic;

use crate::error::{JobStoreError, JobStoreResult};
use crate::metrics;

struct Slot {
    record: JobRecord,
    /// Set under the lock by `delete`; later updates see `NotFound`
    removed: bool,
}

type Entry = Arc<Mutex<Slot>>;

/// Keyed job record store.
pub struct JobStore {
    dir: PathBuf,
    entries: RwLock<HashMap<JobId, Entry>>,
}

impl JobStore {
    /// Open the store in `dir`, loading every persisted record.
    ///
    /// Unreadable record files are moved aside with a `.corrupt` suffix.
    pub async fn open(dir: impl Into<PathBuf>) -> JobStoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut entries = HashMap::new();
        let mut reader = fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {}
                Some("tmp") => {
                    // Left behind by a write that never completed
                    let _ = fs::remove_file(&path).await;
                    continue;
                }
                _ => continue,
            }

            match load_record(&path).await {
                Ok(record) => {
                    entries.insert(
                        record.id.clone(),
                        Arc::new(Mutex::new(Slot {
                            record,
                            removed: false,
                        })),
                    );
                }
                Err(e) => {
                    error!("Failed to load job record {}: {}", path.display(), e);
                    let _ = fs::rename(&path, path.with_extension("corrupt")).await;
                }
            }
        }

        info!("Job store at {} loaded {} records", dir.display(), entries.len());

        Ok(Self {
            dir,
            entries: RwLock::new(entries),
        })
    }

    /// Fail every record that was left in a non-terminal state by a previous
    /// process. Returns the affected ids.
    pub async fn reconcile_interrupted(&self) -> JobStoreResult<Vec<JobId>> {
        let ids: Vec<JobId> = self.entries.read().await.keys().cloned().collect();
        let mut interrupted = Vec::new();

        for id in ids {
            let changed = self
                .update(&id, |record| {
                    if record.is_terminal() {
                        return Ok(false);
                    }
                    record.interrupt()?;
                    Ok(true)
                })
                .await;

            match changed {
                Ok(true) => {
                    warn!(job_id = %id, "Job was interrupted by a restart");
                    interrupted.push(id);
                }
                Ok(false) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        metrics::record_interrupted(interrupted.len());
        Ok(interrupted)
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    async fn entry(&self, id: &JobId) -> JobStoreResult<Entry> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| JobStoreError::NotFound(id.clone()))
    }

    async fn persist(&self, operation: &'static str, record: &JobRecord) -> JobStoreResult<()> {
        let started = Instant::now();
        let result = async {
            let bytes = serde_json::to_vec_pretty(record)?;
            write_atomic(self.record_path(&record.id), &bytes).await?;
            Ok::<_, JobStoreError>(())
        }
        .await;
        metrics::record_write(operation, result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    /// Create a pending record with a fresh id.
    pub async fn create(&self, parameters: JobParameters, source_path: impl Into<PathBuf>) -> JobStoreResult<JobRecord> {
        self.insert(JobRecord::new(JobId::new(), parameters, source_path)).await
    }

    /// Store a new record. The id must not exist yet.
    ///
    /// The map lock is only held to claim the id; the file is written under
    /// the new record's own lock, so other jobs are not held up by it.
    pub async fn insert(&self, record: JobRecord) -> JobStoreResult<JobRecord> {
        if !record.id.is_path_safe() {
            return Err(JobStoreError::InvalidId(record.id.to_string()));
        }

        let mut slot = self.reserve(&record).await?;
        if let Err(e) = self.persist("create", &record).await {
            slot.removed = true;
            drop(slot);
            self.entries.write().await.remove(&record.id);
            return Err(e);
        }
        drop(slot);

        debug!(job_id = %record.id, "Created job record");
        Ok(record)
    }

    /// Claim `record.id` in the map with its slot already locked. Readers of
    /// the id wait on the slot until the caller releases it.
    async fn reserve(&self, record: &JobRecord) -> JobStoreResult<OwnedMutexGuard<Slot>> {
        let entry = Arc::new(Mutex::new(Slot {
            record: record.clone(),
            removed: false,
        }));
        // Uncontended: nobody else can see the entry yet
        let guard = Arc::clone(&entry).lock_owned().await;

        let mut entries = self.entries.write().await;
        if entries.contains_key(&record.id) {
            return Err(JobStoreError::AlreadyExists(record.id.clone()));
        }
        entries.insert(record.id.clone(), entry);
        Ok(guard)
    }

    /// Snapshot of a record.
    pub async fn get(&self, id: &JobId) -> JobStoreResult<JobRecord> {
        let entry = self.entry(id).await?;
        let slot = entry.lock().await;
        if slot.removed {
            return Err(JobStoreError::NotFound(id.clone()));
        }
        Ok(slot.record.clone())
    }

    /// Atomically apply `mutator` to the record.
    ///
    /// Updates to the same id are serialized; updates to different ids run
    /// independently. If the mutator fails or the write fails, the stored
    /// record is unchanged.
    pub async fn update<T, F>(&self, id: &JobId, mutator: F) -> JobStoreResult<T>
    where
        F: FnOnce(&mut JobRecord) -> Result<T, TransitionError>,
    {
        let entry = self.entry(id).await?;
        let mut slot = entry.lock().await;
        if slot.removed {
            return Err(JobStoreError::NotFound(id.clone()));
        }

        let mut next = slot.record.clone();
        let value = mutator(&mut next)?;
        self.persist("update", &next).await?;
        slot.record = next;
        Ok(value)
    }

    /// Remove a record. Once this returns no update for `id` can persist.
    pub async fn delete(&self, id: &JobId) -> JobStoreResult<JobRecord> {
        let entry = self.entry(id).await?;
        let record = {
            let mut slot = entry.lock().await;
            if slot.removed {
                return Err(JobStoreError::NotFound(id.clone()));
            }
            match fs::remove_file(self.record_path(id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            slot.removed = true;
            slot.record.clone()
        };

        self.entries.write().await.remove(id);
        debug!(job_id = %id, "Deleted job record");
        Ok(record)
    }

    /// Snapshots of all records, oldest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let entries: Vec<Entry> = self.entries.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let slot = entry.lock().await;
            if !slot.removed {
                records.push(slot.record.clone());
            }
        }
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.entries.read().await.contains_key(id)
    }
}

async fn load_record(path: &Path) -> JobStoreResult<JobRecord> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
