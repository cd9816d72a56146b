//! Job executor.
//!
//! Each submitted job becomes one tokio task. A semaphore bounds how many
//! run the pipeline at once; the rest wait in `pending`. Every job has a
//! cancellation token and a completion token so a delete can stop it and
//! wait until no stage is executing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hclip_models::JobId;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::Pipeline;

#[derive(Clone)]
struct ActiveJob {
    /// Fired to stop the job
    cancel: CancellationToken,
    /// Fired by the task when it exits
    done: CancellationToken,
}

/// Bounded background executor for pipeline runs.
pub struct JobExecutor {
    pipeline: Arc<Pipeline>,
    job_semaphore: Arc<Semaphore>,
    active: Arc<RwLock<HashMap<JobId, ActiveJob>>>,
    shutdown: CancellationToken,
}

impl JobExecutor {
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent_jobs: usize) -> Self {
        info!("Job executor with {} max concurrent jobs", max_concurrent_jobs);
        Self {
            pipeline,
            job_semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            active: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Schedule job `id`. It runs once an execution slot is free.
    pub async fn submit(&self, id: JobId) -> WorkerResult<()> {
        if self.is_shutting_down() {
            return Err(WorkerError::ShuttingDown);
        }

        let job = ActiveJob {
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        };
        {
            let mut active = self.active.write().await;
            active.insert(id.clone(), job.clone());
            metrics::set_jobs_active(active.len());
        }

        let pipeline = Arc::clone(&self.pipeline);
        let semaphore = Arc::clone(&self.job_semaphore);
        let active = Arc::clone(&self.active);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let _done = job.done.clone().drop_guard();

            let permit = tokio::select! {
                biased;
                _ = job.cancel.cancelled() => None,
                _ = shutdown.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };

            match permit {
                Some(_permit) => pipeline.run(id.clone(), job.cancel.clone()).await,
                None => debug!(job_id = %id, "Job left pending"),
            }

            let mut active = active.write().await;
            active.remove(&id);
            metrics::set_jobs_active(active.len());
        });

        Ok(())
    }

    /// Cancel job `id` if it is queued or running and wait until its task
    /// has exited. Returns `false` if the job was not active.
    pub async fn cancel_and_wait(&self, id: &JobId) -> bool {
        let job = self.active.read().await.get(id).cloned();
        match job {
            Some(job) => {
                job.cancel.cancel();
                job.done.cancelled().await;
                true
            }
            None => false,
        }
    }

    /// Number of jobs queued or running.
    pub async fn active_jobs(&self) -> usize {
        self.active.read().await.len()
    }

    /// Stop admitting jobs and wait up to `timeout` for running ones.
    ///
    /// Jobs still waiting for a slot are left `pending`; running jobs are not
    /// cancelled. Returns `false` if some jobs were still running at the
    /// deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.cancel();

        let waiting: Vec<CancellationToken> = self.active.read().await.values().map(|j| j.done.clone()).collect();
        if waiting.is_empty() {
            return true;
        }

        info!("Waiting for {} in-flight jobs to complete...", waiting.len());
        let all_done = futures::future::join_all(waiting.iter().map(|t| t.cancelled()));
        match tokio::time::timeout(timeout, all_done).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "{} jobs still running after {:?}, they will be marked interrupted on restart",
                    self.active_jobs().await,
                    timeout
                );
                false
            }
        }
    }
}
