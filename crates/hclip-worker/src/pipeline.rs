//! Pipeline orchestrator.
//!
//! Drives one job through the state machine. Every transition is persisted
//! through the job store before the next stage starts; stage failures are
//! classified and written once here and never propagate further.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

use hclip_jobs::{JobStore, JobStoreError};
use hclip_media::CaptionRequest;
use hclip_models::{
    select_key_points, ClipArtifact, ClipVariant, FailureKind, JobFailure, JobId, JobRecord, JobState, KeyPoint,
    Transcript, TransitionError, VideoMetadata,
};
use hclip_storage::{ArtifactStore, JobPaths};

use crate::config::WorkerConfig;
use crate::logging::JobLogger;
use crate::metrics;
use crate::stage::{StageContext, StageExecutor};
use crate::stages::{AnalysisJob, AudioJob, DownloadJob, RenderJob, Stages};

/// Tunables of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_parallel_renders: usize,
    pub stage_timeout: Duration,
    pub max_video_duration: f64,
    /// Size limit for URL submissions
    pub max_download_bytes: u64,
}

impl From<&WorkerConfig> for PipelineSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_parallel_renders: config.max_parallel_renders.max(1),
            stage_timeout: config.stage_timeout,
            max_video_duration: config.max_video_duration,
            max_download_bytes: config.max_upload_bytes,
        }
    }
}

/// Why a run stopped before completing.
enum Halt {
    /// A stage failed; the failure is written to the record
    Failed(JobFailure),
    /// The job was cancelled; nothing more is written
    Cancelled,
    /// The record was deleted or already terminal
    Abandoned(String),
    /// The record could not be written
    Store(JobStoreError),
}

type Step<T> = Result<T, Halt>;

fn halt_from_store(e: JobStoreError) -> Halt {
    match e {
        JobStoreError::NotFound(_) => Halt::Abandoned("job record was deleted".to_string()),
        JobStoreError::Transition(TransitionError::Cancelled) => Halt::Cancelled,
        JobStoreError::Transition(t) => Halt::Abandoned(t.to_string()),
        other => Halt::Store(other),
    }
}

fn failed(kind: FailureKind, stage: JobState, message: impl Into<String>) -> Halt {
    Halt::Failed(JobFailure::new(kind, stage, message))
}

/// A trimmed clip and the key point slot it was rendered for.
struct RenderedClip {
    slot: usize,
    artifact: ClipArtifact,
}

/// Drives jobs through the stages.
pub struct Pipeline {
    store: Arc<JobStore>,
    artifacts: ArtifactStore,
    stages: Stages,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(store: Arc<JobStore>, artifacts: ArtifactStore, stages: Stages, settings: PipelineSettings) -> Self {
        Self {
            store,
            artifacts,
            stages,
            settings,
        }
    }

    /// Run job `id` to a terminal state, or until `cancel` fires.
    pub async fn run(&self, id: JobId, cancel: CancellationToken) {
        let logger = JobLogger::new(&id);
        let span = logger.span();
        self.run_inner(id, cancel, logger).instrument(span).await
    }

    async fn run_inner(&self, id: JobId, cancel: CancellationToken, logger: JobLogger) {
        let record = match self.store.get(&id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(job_id = %id, "Skipping job: {}", e);
                return;
            }
        };
        let paths = match self.artifacts.paths(&id) {
            Ok(paths) => paths,
            Err(e) => {
                error!(job_id = %id, "Skipping job: {}", e);
                return;
            }
        };
        let ctx = StageContext {
            job_id: id,
            parameters: record.parameters.clone(),
            work_dir: paths.work_dir(),
            cancel,
            timeout: self.settings.stage_timeout,
        };

        match &record.source_url {
            Some(url) => logger.log_start(url),
            None => logger.log_start(&record.source_path.display().to_string()),
        }

        match self.drive(&record, &paths, &ctx, &logger).await {
            Ok(()) => {}
            Err(Halt::Failed(failure)) => self.record_failure(&ctx, &logger, failure).await,
            Err(Halt::Cancelled) => {
                logger.log_cancelled();
                metrics::record_job_cancelled();
            }
            Err(Halt::Abandoned(reason)) => {
                warn!(job_id = %ctx.job_id, "Stopped processing: {}", reason);
            }
            Err(Halt::Store(e)) => {
                error!(job_id = %ctx.job_id, "Job store write failed: {}", e);
                let message = format!("Could not persist job progress: {}", e);
                let cancel = &ctx.cancel;
                let result = self
                    .store
                    .update(&ctx.job_id, |r| {
                        if cancel.is_cancelled() {
                            return Err(TransitionError::Cancelled);
                        }
                        let stage = r.status;
                        r.fail(JobFailure::new(FailureKind::ResourceExhausted, stage, message))
                    })
                    .await;
                if let Err(e) = result {
                    error!(job_id = %ctx.job_id, "Could not mark job failed: {}", e);
                }
            }
        }
    }

    async fn drive(&self, record: &JobRecord, paths: &JobPaths, ctx: &StageContext, logger: &JobLogger) -> Step<()> {
        let params = &record.parameters;

        // Download
        let source_path = match &record.source_url {
            Some(url) => {
                self.transition(ctx, logger, JobState::Downloading, "Downloading video".into(), |_| {})
                    .await?;
                let job = DownloadJob {
                    url: url.clone(),
                    output: record.source_path.clone(),
                    max_bytes: self.settings.max_download_bytes,
                };
                self.run_stage(ctx, logger, JobState::Downloading, &*self.stages.downloader, job)
                    .await?
            }
            None => record.source_path.clone(),
        };

        // Pre-flight
        let downloaded = source_path.clone();
        self.transition(ctx, logger, JobState::Processing, "Validating source video".into(), move |r| {
            r.source_path = downloaded
        })
        .await?;
        let source = self
            .run_stage(ctx, logger, JobState::Processing, &*self.stages.prober, source_path.clone())
            .await?;
        self.check_source(&source)?;

        // Audio extraction
        let metadata = source.clone();
        self.transition(ctx, logger, JobState::ExtractingAudio, "Extracting audio".into(), move |r| {
            r.source = Some(metadata)
        })
        .await?;
        if !source.has_audio {
            return Err(failed(
                FailureKind::InvalidInput,
                JobState::ExtractingAudio,
                "Source video has no audio track",
            ));
        }
        let audio_job = AudioJob {
            source: source_path.clone(),
            output: paths.audio(),
        };
        let audio = self
            .run_stage(ctx, logger, JobState::ExtractingAudio, &*self.stages.audio, audio_job)
            .await?;

        // Transcription
        let audio_path = audio.clone();
        self.transition(ctx, logger, JobState::Transcribing, "Transcribing audio".into(), move |r| {
            r.intermediate.audio_path = Some(audio_path)
        })
        .await?;
        let transcript = self
            .run_stage(ctx, logger, JobState::Transcribing, &*self.stages.transcriber, audio)
            .await?;
        let transcript = Arc::new(transcript);
        self.save(JobState::Transcribing, &paths.transcript(), &*transcript).await?;

        // Analysis
        let transcript_path = paths.transcript();
        let info = transcript.info.clone();
        self.transition(ctx, logger, JobState::Analyzing, "Finding key moments".into(), move |r| {
            r.intermediate.transcript_path = Some(transcript_path);
            r.transcription = Some(info);
        })
        .await?;
        let key_points = if transcript.is_empty() {
            logger.log_stage(JobState::Analyzing, "Transcript is empty, skipping analysis");
            Vec::new()
        } else {
            let job = AnalysisJob {
                transcript: Arc::clone(&transcript),
                max_clips: params.max_clips,
                min_clip_duration: params.min_clip_duration,
                max_clip_duration: params.max_clip_duration,
            };
            self.run_stage(ctx, logger, JobState::Analyzing, &*self.stages.analyzer, job)
                .await?
        };
        let selected = select_key_points(
            key_points,
            params.max_clips as usize,
            params.min_clip_duration,
            params.max_clip_duration,
            source.duration,
        );
        self.save(JobState::Analyzing, &paths.key_points(), &selected).await?;

        let key_points_path = paths.key_points();
        if selected.is_empty() {
            let message = if transcript.is_empty() {
                "No speech detected in the video"
            } else {
                "No key points found in the video"
            };
            return self
                .complete(ctx, logger, Vec::new(), Vec::new(), message.to_string(), move |r| {
                    r.intermediate.key_points_path = Some(key_points_path)
                })
                .await;
        }

        // Trimming
        let message = format!("Rendering {} clips", selected.len());
        self.transition(ctx, logger, JobState::Trimming, message, move |r| {
            r.intermediate.key_points_path = Some(key_points_path)
        })
        .await?;
        let (mut clips, mut notes, first_failure) = self
            .trim_all(ctx, logger, &source_path, paths, &selected)
            .await?;
        if clips.is_empty() {
            let kind = first_failure
                .map(|f| f.kind)
                .unwrap_or(FailureKind::ExternalToolFailure);
            let cause = notes.first().cloned().unwrap_or_default();
            return Err(failed(
                kind,
                JobState::Trimming,
                format!("All {} clips failed to render. {}", selected.len(), cause),
            ));
        }
        let summary = if clips.len() == selected.len() {
            format!("Generated {} clips", clips.len())
        } else {
            format!("Generated {} of {} clips", clips.len(), selected.len())
        };

        // Captions
        if params.include_captions {
            let trim_notes = std::mem::take(&mut notes);
            let message = format!("Adding captions to {} clips", clips.len());
            self.transition(ctx, logger, JobState::AddingCaptions, message, move |r| {
                for note in trim_notes {
                    r.add_note(note);
                }
            })
            .await?;
            notes = self
                .caption_all(ctx, logger, paths, &transcript, &source, &mut clips)
                .await?;
        }

        let clips = clips.into_iter().map(|c| c.artifact).collect();
        self.complete(ctx, logger, clips, notes, summary, |_| {}).await
    }

    fn check_source(&self, source: &VideoMetadata) -> Step<()> {
        if !source.duration.is_finite() || source.duration <= 0.0 {
            return Err(failed(
                FailureKind::InvalidInput,
                JobState::Processing,
                "Could not determine the video duration",
            ));
        }
        if source.duration > self.settings.max_video_duration {
            return Err(failed(
                FailureKind::InvalidInput,
                JobState::Processing,
                format!(
                    "Video is {:.0}s long, the limit is {:.0}s",
                    source.duration, self.settings.max_video_duration
                ),
            ));
        }
        Ok(())
    }

    /// Trim every key point, up to `max_parallel_renders` at once. Failed
    /// trims become notes; survivors are indexed densely in key point order.
    async fn trim_all(
        &self,
        ctx: &StageContext,
        logger: &JobLogger,
        source: &Path,
        paths: &JobPaths,
        key_points: &[KeyPoint],
    ) -> Step<(Vec<RenderedClip>, Vec<String>, Option<JobFailure>)> {
        let renderer = &*self.stages.renderer;
        let renders: Vec<_> = key_points
            .iter()
            .enumerate()
            .map(|(slot, kp)| {
                let job = RenderJob::Trim {
                    source: source.to_path_buf(),
                    range: kp.time_range(),
                    output: paths.clip(slot, ClipVariant::Plain),
                };
                async move { (slot, self.run_stage(ctx, logger, JobState::Trimming, renderer, job).await) }
            })
            .collect();
        let mut results: Vec<(usize, Step<PathBuf>)> = stream::iter(renders)
            .buffer_unordered(self.settings.max_parallel_renders)
            .collect()
            .await;
        results.sort_by_key(|(slot, _)| *slot);

        let mut clips = Vec::with_capacity(results.len());
        let mut notes = Vec::new();
        let mut first_failure = None;
        for (slot, result) in results {
            let kp = &key_points[slot];
            match result {
                Ok(plain_path) => {
                    let artifact = ClipArtifact {
                        index: clips.len(),
                        time_range: kp.time_range(),
                        title: kp.title.clone(),
                        summary: kp.summary.clone(),
                        importance: kp.importance,
                        plain_path,
                        captioned_path: None,
                    };
                    clips.push(RenderedClip { slot, artifact });
                }
                Err(Halt::Failed(failure)) => {
                    let note = format!(
                        "Clip {} ({:.1}s - {:.1}s) was skipped: {}",
                        slot + 1,
                        kp.start_time,
                        kp.end_time,
                        failure.message
                    );
                    logger.log_note(JobState::Trimming, &note);
                    metrics::record_clip_failure(JobState::Trimming);
                    notes.push(note);
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
                Err(halt) => return Err(halt),
            }
        }

        Ok((clips, notes, first_failure))
    }

    /// Burn captions into every clip that has words. Failures leave the
    /// plain clip in place and become notes.
    async fn caption_all(
        &self,
        ctx: &StageContext,
        logger: &JobLogger,
        paths: &JobPaths,
        transcript: &Transcript,
        source: &VideoMetadata,
        clips: &mut [RenderedClip],
    ) -> Step<Vec<String>> {
        let params = &ctx.parameters;
        let renderer = &*self.stages.renderer;

        let jobs: Vec<(usize, RenderJob)> = clips
            .iter()
            .enumerate()
            .filter_map(|(pos, clip)| {
                let words = transcript.words_in_range(clip.artifact.time_range);
                if words.is_empty() {
                    debug!(job_id = %ctx.job_id, "Clip {} has no words, leaving it uncaptioned", pos);
                    return None;
                }
                let request = CaptionRequest {
                    words,
                    style: params.caption_style,
                    mode: params.caption_mode,
                    width: source.render_width(),
                    height: source.render_height(),
                };
                let job = RenderJob::Caption {
                    clip: clip.artifact.plain_path.clone(),
                    output: paths.clip(clip.slot, ClipVariant::Captioned),
                    request,
                };
                Some((pos, job))
            })
            .collect();

        let renders: Vec<_> = jobs
            .into_iter()
            .map(|(pos, job)| async move {
                (pos, self.run_stage(ctx, logger, JobState::AddingCaptions, renderer, job).await)
            })
            .collect();
        let mut results: Vec<(usize, Step<PathBuf>)> = stream::iter(renders)
            .buffer_unordered(self.settings.max_parallel_renders)
            .collect()
            .await;
        results.sort_by_key(|(pos, _)| *pos);

        let mut notes = Vec::new();
        for (pos, result) in results {
            match result {
                Ok(path) => clips[pos].artifact.captioned_path = Some(path),
                Err(Halt::Failed(failure)) => {
                    let note = format!(
                        "Captions for clip {} failed, the plain clip is available: {}",
                        clips[pos].artifact.index + 1,
                        failure.message
                    );
                    logger.log_note(JobState::AddingCaptions, &note);
                    metrics::record_clip_failure(JobState::AddingCaptions);
                    notes.push(note);
                }
                Err(halt) => return Err(halt),
            }
        }
        Ok(notes)
    }

    /// Run one executor call, racing it against cancellation and the stage
    /// timeout.
    async fn run_stage<S>(
        &self,
        ctx: &StageContext,
        logger: &JobLogger,
        stage: JobState,
        executor: &S,
        input: S::Input,
    ) -> Step<S::Output>
    where
        S: StageExecutor + ?Sized,
    {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Halt::Cancelled),
            outcome = tokio::time::timeout(ctx.timeout, executor.execute(input, ctx)) => outcome,
        };
        let elapsed = started.elapsed();
        metrics::record_stage_duration(stage, elapsed.as_secs_f64());

        match outcome {
            Ok(Ok(output)) => {
                logger.log_stage_finished(stage, elapsed);
                Ok(output)
            }
            // Executors report cancellation as an ordinary error
            Ok(Err(_)) if ctx.cancel.is_cancelled() => Err(Halt::Cancelled),
            Ok(Err(e)) => Err(failed(e.kind.into(), stage, format!("{} failed: {}", executor.name(), e))),
            Err(_) => Err(failed(
                FailureKind::Timeout,
                stage,
                format!("{} timed out after {}s", executor.name(), ctx.timeout.as_secs()),
            )),
        }
    }

    /// Persist entry into `next`, applying `extra` in the same write.
    async fn transition<F>(
        &self,
        ctx: &StageContext,
        logger: &JobLogger,
        next: JobState,
        message: String,
        extra: F,
    ) -> Step<()>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        if ctx.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let stored = message.clone();
        let cancel = &ctx.cancel;
        self.store
            .update(&ctx.job_id, move |r| {
                // Checked under the record lock so a delete racing this write wins
                if cancel.is_cancelled() {
                    return Err(TransitionError::Cancelled);
                }
                extra(r);
                r.advance(next, stored)
            })
            .await
            .map_err(halt_from_store)?;
        logger.log_stage(next, &message);
        Ok(())
    }

    async fn complete<F>(
        &self,
        ctx: &StageContext,
        logger: &JobLogger,
        clips: Vec<ClipArtifact>,
        notes: Vec<String>,
        message: String,
        extra: F,
    ) -> Step<()>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        if ctx.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let clip_count = clips.len();
        let cancel = &ctx.cancel;
        let record = self
            .store
            .update(&ctx.job_id, move |r| {
                if cancel.is_cancelled() {
                    return Err(TransitionError::Cancelled);
                }
                extra(r);
                for note in notes {
                    r.add_note(note);
                }
                r.complete(clips, message)?;
                Ok(r.clone())
            })
            .await
            .map_err(halt_from_store)?;

        metrics::record_job_completed(clip_count);
        logger.log_completion(clip_count, record.notes.len());
        Ok(())
    }

    async fn save<T: Serialize + Sync>(&self, stage: JobState, path: &Path, value: &T) -> Step<()> {
        self.artifacts.write_json(path, value).await.map_err(|e| {
            failed(
                FailureKind::ResourceExhausted,
                stage,
                format!("Could not store {}: {}", path.display(), e),
            )
        })
    }

    async fn record_failure(&self, ctx: &StageContext, logger: &JobLogger, failure: JobFailure) {
        if ctx.cancel.is_cancelled() {
            logger.log_cancelled();
            metrics::record_job_cancelled();
            return;
        }

        logger.log_failure(&failure);
        let (stage, kind) = (failure.stage, failure.kind);
        let cancel = &ctx.cancel;
        let result = self
            .store
            .update(&ctx.job_id, move |r| {
                if cancel.is_cancelled() {
                    return Err(TransitionError::Cancelled);
                }
                r.fail(failure)
            })
            .await;
        match result {
            Ok(()) => metrics::record_job_failed(stage, kind),
            Err(JobStoreError::Transition(TransitionError::Cancelled)) => metrics::record_job_cancelled(),
            Err(e) if e.is_not_found() => debug!(job_id = %ctx.job_id, "Job deleted before failure was recorded"),
            Err(e) => error!(job_id = %ctx.job_id, "Could not record failure: {}", e),
        }
    }
}
