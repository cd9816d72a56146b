//! Fake stage executors and helpers for pipeline tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use hclip_jobs::JobStore;
use hclip_models::{
    JobId, JobParameters, JobRecord, KeyPoint, Transcript, TranscriptSegment, TranscriptionInfo, VideoMetadata,
    WordTimestamp,
};
use hclip_storage::ArtifactStore;
use hclip_worker::stages::{AnalysisJob, AudioJob, DownloadJob, RenderJob};
use hclip_worker::{
    JobService, Pipeline, PipelineSettings, StageContext, StageError, StageExecutor, Stages, WorkerConfig,
};

async fn write_output(path: &Path, contents: &[u8]) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StageError::resource_exhausted(e.to_string()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StageError::resource_exhausted(e.to_string()))
}

#[derive(Default)]
pub struct FakeDownloader {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl StageExecutor for FakeDownloader {
    type Input = DownloadJob;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "fake download"
    }

    async fn execute(&self, job: DownloadJob, _ctx: &StageContext) -> Result<PathBuf, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::invalid_input(format!("Video unavailable: {}", job.url)));
        }
        write_output(&job.output, b"downloaded video").await?;
        Ok(job.output)
    }
}

pub struct FakeProber {
    pub duration: f64,
    pub has_audio: bool,
}

#[async_trait]
impl StageExecutor for FakeProber {
    type Input = PathBuf;
    type Output = VideoMetadata;

    fn name(&self) -> &'static str {
        "fake probe"
    }

    async fn execute(&self, source: PathBuf, _ctx: &StageContext) -> Result<VideoMetadata, StageError> {
        Ok(VideoMetadata {
            filename: source.file_name().unwrap().to_string_lossy().into_owned(),
            duration: self.duration,
            width: 1920,
            height: 1080,
            fps: 30.0,
            size_bytes: 1024,
            has_audio: self.has_audio,
        })
    }
}

#[derive(Default)]
pub struct FakeAudio {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl StageExecutor for FakeAudio {
    type Input = AudioJob;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "fake audio extraction"
    }

    async fn execute(&self, job: AudioJob, _ctx: &StageContext) -> Result<PathBuf, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::external("ffmpeg exited with status 1"));
        }
        write_output(&job.output, b"RIFF....WAVE").await?;
        Ok(job.output)
    }
}

struct SetOnDrop<'a>(&'a AtomicBool);

impl Drop for SetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub enum TranscriberMode {
    Immediate,
    /// Never finish on its own; the pipeline has to stop it
    BlockUntilCancelled,
    /// Wait for a permit before returning
    Gated(Arc<Semaphore>),
}

pub struct FakeTranscriber {
    pub transcript: Transcript,
    pub mode: TranscriberMode,
    pub calls: AtomicUsize,
    /// Set once a blocked call has been dropped or cancelled
    pub stopped: AtomicBool,
}

impl FakeTranscriber {
    pub fn new(transcript: Transcript, mode: TranscriberMode) -> Self {
        Self {
            transcript,
            mode,
            calls: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StageExecutor for FakeTranscriber {
    type Input = PathBuf;
    type Output = Transcript;

    fn name(&self) -> &'static str {
        "fake transcription"
    }

    async fn execute(&self, _audio: PathBuf, ctx: &StageContext) -> Result<Transcript, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            TranscriberMode::Immediate => {}
            TranscriberMode::BlockUntilCancelled => {
                let _stopped = SetOnDrop(&self.stopped);
                ctx.cancel.cancelled().await;
                return Err(StageError::external("transcription cancelled"));
            }
            TranscriberMode::Gated(gate) => {
                let _permit = gate.acquire().await.map_err(|e| StageError::external(e.to_string()))?;
            }
        }
        Ok(self.transcript.clone())
    }
}

pub struct FakeAnalyzer {
    pub key_points: Vec<KeyPoint>,
    pub calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn new(key_points: Vec<KeyPoint>) -> Self {
        Self {
            key_points,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StageExecutor for FakeAnalyzer {
    type Input = AnalysisJob;
    type Output = Vec<KeyPoint>;

    fn name(&self) -> &'static str {
        "fake analysis"
    }

    async fn execute(&self, _job: AnalysisJob, _ctx: &StageContext) -> Result<Vec<KeyPoint>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.key_points.clone())
    }
}

#[derive(Default)]
pub struct FakeRenderer {
    /// Output file names whose trim fails, e.g. `clip_01.mp4`
    pub fail_trims: Vec<&'static str>,
    pub fail_captions: bool,
    pub trims: AtomicUsize,
    pub captions: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Notified when a render starts
    pub started: Notify,
    /// When set, every render waits for a permit first
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeRenderer {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }
}

#[async_trait]
impl StageExecutor for FakeRenderer {
    type Input = RenderJob;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "fake render"
    }

    async fn execute(&self, job: RenderJob, _ctx: &StageContext) -> Result<PathBuf, StageError> {
        self.started.notify_one();
        let _permit = match &self.gate {
            Some(gate) => Some(gate.acquire().await.map_err(|e| StageError::external(e.to_string()))?),
            None => None,
        };
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match job {
            RenderJob::Trim { output, .. } => {
                self.trims.fetch_add(1, Ordering::SeqCst);
                let name = output.file_name().unwrap().to_string_lossy().into_owned();
                if self.fail_trims.iter().any(|f| *f == name) {
                    return Err(StageError::external(format!("ffmpeg could not encode {}", name)));
                }
                write_output(&output, b"plain clip").await?;
                Ok(output)
            }
            RenderJob::Caption { output, request, .. } => {
                self.captions.fetch_add(1, Ordering::SeqCst);
                assert!(!request.words.is_empty());
                if self.fail_captions {
                    return Err(StageError::external("ass filter failed"));
                }
                write_output(&output, b"captioned clip").await?;
                Ok(output)
            }
        }
    }
}

pub fn key_point(title: &str, start: f64, end: f64) -> KeyPoint {
    KeyPoint {
        title: title.to_string(),
        summary: format!("{} summary", title),
        start_time: start,
        end_time: end,
        importance: 7,
    }
}

/// Three 30 s key points; only the first two have speech.
pub fn sample_key_points() -> Vec<KeyPoint> {
    vec![
        key_point("Ownership", 10.0, 40.0),
        key_point("Borrowing", 60.0, 90.0),
        key_point("Silence", 200.0, 230.0),
    ]
}

pub fn sample_transcript() -> Transcript {
    Transcript {
        segments: vec![
            TranscriptSegment {
                start: 10.0,
                end: 40.0,
                text: "Ownership moves values.".into(),
                words: vec![
                    WordTimestamp::new("Ownership", 12.0, 12.5),
                    WordTimestamp::new("moves", 12.6, 13.0),
                    WordTimestamp::new("values.", 13.1, 13.6),
                ],
            },
            TranscriptSegment {
                start: 60.0,
                end: 90.0,
                text: "Borrowing is cheap.".into(),
                words: vec![
                    WordTimestamp::new("Borrowing", 61.0, 61.5),
                    WordTimestamp::new("is", 61.6, 61.8),
                    WordTimestamp::new("cheap.", 61.9, 62.4),
                ],
            },
        ],
        info: TranscriptionInfo {
            language: Some("en".into()),
            language_probability: Some(0.98),
            duration: 300.0,
        },
    }
}

pub struct Fakes {
    pub downloader: Arc<FakeDownloader>,
    pub prober: Arc<FakeProber>,
    pub audio: Arc<FakeAudio>,
    pub transcriber: Arc<FakeTranscriber>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub renderer: Arc<FakeRenderer>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            downloader: Arc::new(FakeDownloader::default()),
            prober: Arc::new(FakeProber {
                duration: 300.0,
                has_audio: true,
            }),
            audio: Arc::new(FakeAudio::default()),
            transcriber: Arc::new(FakeTranscriber::new(sample_transcript(), TranscriberMode::Immediate)),
            analyzer: Arc::new(FakeAnalyzer::new(sample_key_points())),
            renderer: Arc::new(FakeRenderer::default()),
        }
    }
}

impl Fakes {
    pub fn stages(&self) -> Stages {
        Stages {
            downloader: self.downloader.clone(),
            prober: self.prober.clone(),
            audio: self.audio.clone(),
            transcriber: self.transcriber.clone(),
            analyzer: self.analyzer.clone(),
            renderer: self.renderer.clone(),
        }
    }
}

pub fn test_config(root: &Path) -> WorkerConfig {
    WorkerConfig {
        data_dir: root.join("data"),
        max_concurrent_jobs: 2,
        max_parallel_renders: 2,
        stage_timeout: Duration::from_secs(10),
        shutdown_timeout: Duration::from_secs(5),
        ..WorkerConfig::default()
    }
}

pub async fn start(root: &Path, fakes: &Fakes) -> JobService {
    start_with(root, fakes, |_| {}).await
}

pub async fn start_with(root: &Path, fakes: &Fakes, tweak: impl FnOnce(&mut WorkerConfig)) -> JobService {
    let mut config = test_config(root);
    tweak(&mut config);
    JobService::start(config, fakes.stages()).await.unwrap()
}

/// Write a fake upload and return its path.
pub async fn upload(root: &Path, name: &str) -> PathBuf {
    let dir = root.join("uploads");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join(format!("{}-{}", JobId::new(), name));
    tokio::fs::write(&path, b"not really a video").await.unwrap();
    path
}

/// A pipeline driven directly, without the executor, and one pending job
/// for it.
pub struct PipelineHarness {
    pub store: Arc<JobStore>,
    pub pipeline: Arc<Pipeline>,
    pub record: JobRecord,
}

pub async fn pipeline_harness(root: &Path, fakes: &Fakes, parameters: JobParameters) -> PipelineHarness {
    let config = test_config(root);
    let artifacts = ArtifactStore::open(config.data_dir.clone()).await.unwrap();
    let store = Arc::new(JobStore::open(config.records_dir()).await.unwrap());

    let id = JobId::new();
    let source = artifacts
        .import_source(&id, &upload(root, "talk.mp4").await, "mp4")
        .await
        .unwrap();
    let record = store.insert(JobRecord::new(id, parameters, source)).await.unwrap();

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        artifacts,
        fakes.stages(),
        PipelineSettings::from(&config),
    ));
    PipelineHarness {
        store,
        pipeline,
        record,
    }
}

pub async fn submit(service: &JobService, root: &Path, parameters: JobParameters) -> JobRecord {
    let path = upload(root, "talk.mp4").await;
    service.submit(parameters, &path, "talk.mp4").await.unwrap()
}

/// Poll until `done` holds, returning every snapshot seen.
pub async fn poll_until(
    service: &JobService,
    id: &JobId,
    done: impl Fn(&JobRecord) -> bool,
) -> Vec<JobRecord> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let record = service.status(id).await.unwrap();
            let finished = done(&record);
            seen.push(record);
            if finished {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "job {} did not reach the expected state", id);
    seen
}

pub async fn wait_terminal(service: &JobService, id: &JobId) -> JobRecord {
    poll_until(service, id, |r| r.is_terminal()).await.pop().unwrap()
}
