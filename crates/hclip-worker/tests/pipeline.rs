//! End-to-end pipeline behavior with fake stage executors.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use hclip_jobs::JobStore;
use hclip_models::{ClipVariant, FailureKind, JobParameters, JobRecord, JobState, Transcript};
use hclip_storage::ArtifactStore;
use hclip_worker::WorkerError;

use common::*;

#[tokio::test]
async fn completes_with_captions_and_serves_clips() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes::default();
    let service = start(root.path(), &fakes).await;

    let submitted = submit(&service, root.path(), JobParameters::default()).await;
    assert_eq!(submitted.status, JobState::Pending);
    assert_eq!(submitted.progress, 0);

    let history = poll_until(&service, &submitted.id, |r| r.is_terminal()).await;
    let progress: Vec<u8> = history.iter().map(|r| r.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);

    assert!(history.iter().all(|r| r.status != JobState::Downloading));

    let record = history.last().unwrap();
    assert_eq!(record.status, JobState::Completed);
    assert_eq!(record.progress, 100);
    assert!(record.notes.is_empty());
    assert!(record.source_url.is_none());
    assert_eq!(record.transcription.as_ref().unwrap().language.as_deref(), Some("en"));
    assert!(record.intermediate.transcript_path.as_ref().unwrap().exists());
    assert!(record.intermediate.key_points_path.as_ref().unwrap().exists());

    let indices: Vec<usize> = record.clips.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(record.clips[0].captioned_path.is_some());
    assert!(record.clips[1].captioned_path.is_some());
    // No speech inside the third range
    assert!(record.clips[2].captioned_path.is_none());

    let params = &record.parameters;
    for clip in &record.clips {
        assert!(clip.duration() >= params.min_clip_duration && clip.duration() <= params.max_clip_duration);
        assert!(clip.time_range.start >= 0.0 && clip.time_range.end <= 300.0);
    }

    let captioned = service.fetch_clip(&record.id, 0, true).await.unwrap();
    assert_eq!(captioned.variant, ClipVariant::Captioned);
    assert_eq!(tokio::fs::read(&captioned.path).await.unwrap(), b"captioned clip");

    let plain = service.fetch_clip(&record.id, 0, false).await.unwrap();
    assert_eq!(plain.variant, ClipVariant::Plain);

    let fallback = service.fetch_clip(&record.id, 2, true).await.unwrap();
    assert_eq!(fallback.variant, ClipVariant::Plain);

    let missing = service.fetch_clip(&record.id, 3, false).await;
    assert!(matches!(missing, Err(WorkerError::ClipNotFound { index: 3, .. })));
}

#[tokio::test]
async fn trims_respect_render_limit() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes::default();
    let service = start_with(root.path(), &fakes, |c| c.max_parallel_renders = 2).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Completed);
    assert_eq!(fakes.renderer.trims.load(Ordering::SeqCst), 3);
    assert_eq!(fakes.renderer.captions.load(Ordering::SeqCst), 2);
    assert!(fakes.renderer.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn zero_key_points_completes_with_no_clips() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        analyzer: Arc::new(FakeAnalyzer::new(Vec::new())),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Completed);
    assert_eq!(record.progress, 100);
    assert!(record.clips.is_empty());
    assert_eq!(record.message, "No key points found in the video");
    assert_eq!(fakes.renderer.trims.load(Ordering::SeqCst), 0);
    assert!(matches!(
        service.fetch_clip(&job.id, 0, false).await,
        Err(WorkerError::ClipNotFound { .. })
    ));
}

#[tokio::test]
async fn empty_transcript_skips_analysis() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        transcriber: Arc::new(FakeTranscriber::new(Transcript::default(), TranscriberMode::Immediate)),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Completed);
    assert!(record.clips.is_empty());
    assert_eq!(record.message, "No speech detected in the video");
    assert_eq!(fakes.analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn audio_failure_stops_the_pipeline() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        audio: Arc::new(FakeAudio {
            fail: true,
            ..FakeAudio::default()
        }),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Failed);
    assert_eq!(record.progress, 20);
    let error = record.error.unwrap();
    assert_eq!(error.stage, JobState::ExtractingAudio);
    assert_eq!(error.kind, FailureKind::ExternalToolFailure);
    assert!(error.message.contains("ffmpeg exited with status 1"));
    assert_eq!(fakes.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fakes.analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn source_without_audio_is_invalid_input() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        prober: Arc::new(FakeProber {
            duration: 300.0,
            has_audio: false,
        }),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    let error = record.error.unwrap();
    assert_eq!(error.stage, JobState::ExtractingAudio);
    assert_eq!(error.kind, FailureKind::InvalidInput);
    assert_eq!(fakes.audio.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overlong_source_fails_preflight() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        prober: Arc::new(FakeProber {
            duration: 7200.0,
            has_audio: true,
        }),
        ..Fakes::default()
    };
    let service = start_with(root.path(), &fakes, |c| c.max_video_duration = 3600.0).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Failed);
    assert_eq!(record.progress, 5);
    let error = record.error.unwrap();
    assert_eq!(error.stage, JobState::Processing);
    assert_eq!(error.kind, FailureKind::InvalidInput);
    assert_eq!(fakes.audio.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_failed_trim_becomes_a_note() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        renderer: Arc::new(FakeRenderer {
            fail_trims: vec!["clip_01.mp4"],
            ..FakeRenderer::default()
        }),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Completed);
    let titles: Vec<&str> = record.clips.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Ownership", "Silence"]);
    let indices: Vec<usize> = record.clips.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(record.notes.len(), 1);
    assert!(record.notes[0].contains("Clip 2"));
    assert_eq!(record.message, "Generated 2 of 3 clips");

    // Index 1 now refers to the third key point
    let clip = service.fetch_clip(&job.id, 1, false).await.unwrap();
    assert!(clip.path.ends_with("clip_02.mp4"));
}

#[tokio::test]
async fn all_trims_failing_fails_the_job() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        renderer: Arc::new(FakeRenderer {
            fail_trims: vec!["clip_00.mp4", "clip_01.mp4", "clip_02.mp4"],
            ..FakeRenderer::default()
        }),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Failed);
    assert_eq!(record.progress, 85);
    assert!(record.clips.is_empty());
    let error = record.error.unwrap();
    assert_eq!(error.stage, JobState::Trimming);
    assert_eq!(error.kind, FailureKind::ExternalToolFailure);
}

#[tokio::test]
async fn caption_failure_keeps_plain_clips() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        renderer: Arc::new(FakeRenderer {
            fail_captions: true,
            ..FakeRenderer::default()
        }),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Completed);
    assert_eq!(record.clips.len(), 3);
    assert!(record.clips.iter().all(|c| c.captioned_path.is_none()));
    assert_eq!(record.notes.len(), 2);

    let clip = service.fetch_clip(&job.id, 0, true).await.unwrap();
    assert_eq!(clip.variant, ClipVariant::Plain);
}

#[tokio::test]
async fn captions_not_requested_skip_caption_stage() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes::default();
    let service = start(root.path(), &fakes).await;

    let params = JobParameters {
        include_captions: false,
        ..JobParameters::default()
    };
    let job = submit(&service, root.path(), params).await;
    let history = poll_until(&service, &job.id, |r| r.is_terminal()).await;

    assert!(history.iter().all(|r| r.status != JobState::AddingCaptions));
    assert_eq!(history.last().unwrap().status, JobState::Completed);
    assert_eq!(fakes.renderer.captions.load(Ordering::SeqCst), 0);

    let clip = service.fetch_clip(&job.id, 0, true).await.unwrap();
    assert_eq!(clip.variant, ClipVariant::Plain);
}

#[tokio::test]
async fn delete_during_transcription_cancels_and_removes_everything() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        transcriber: Arc::new(FakeTranscriber::new(
            sample_transcript(),
            TranscriberMode::BlockUntilCancelled,
        )),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    poll_until(&service, &job.id, |r| r.status == JobState::Transcribing).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    service.delete(&job.id).await.unwrap();

    assert!(fakes.transcriber.stopped.load(Ordering::SeqCst));
    assert!(matches!(service.status(&job.id).await, Err(WorkerError::NotFound(_))));
    assert!(!root.path().join("data/jobs").join(job.id.as_str()).exists());
    assert!(!root.path().join("data/records").join(format!("{}.json", job.id)).exists());
    assert_eq!(fakes.analyzer.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(service.delete(&job.id).await, Err(WorkerError::NotFound(_))));
}

#[tokio::test]
async fn slow_stage_times_out() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        transcriber: Arc::new(FakeTranscriber::new(
            sample_transcript(),
            TranscriberMode::BlockUntilCancelled,
        )),
        ..Fakes::default()
    };
    let service = start_with(root.path(), &fakes, |c| c.stage_timeout = Duration::from_millis(100)).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Failed);
    let error = record.error.unwrap();
    assert_eq!(error.kind, FailureKind::Timeout);
    assert_eq!(error.stage, JobState::Transcribing);
}

#[tokio::test]
async fn jobs_beyond_the_limit_wait_in_pending() {
    let root = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let fakes = Fakes {
        transcriber: Arc::new(FakeTranscriber::new(
            sample_transcript(),
            TranscriberMode::Gated(Arc::clone(&gate)),
        )),
        ..Fakes::default()
    };
    let service = start_with(root.path(), &fakes, |c| c.max_concurrent_jobs = 1).await;

    let first = submit(&service, root.path(), JobParameters::default()).await;
    poll_until(&service, &first.id, |r| r.status == JobState::Transcribing).await;
    let second = submit(&service, root.path(), JobParameters::default()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let waiting = service.status(&second.id).await.unwrap();
    assert_eq!(waiting.status, JobState::Pending);
    assert_eq!(waiting.progress, 0);

    // Clips are not available until the job completes
    assert!(matches!(
        service.fetch_clip(&first.id, 0, false).await,
        Err(WorkerError::NotReady {
            status: JobState::Transcribing,
            ..
        })
    ));

    gate.add_permits(2);
    assert_eq!(wait_terminal(&service, &first.id).await.status, JobState::Completed);
    assert_eq!(wait_terminal(&service, &second.id).await.status, JobState::Completed);
}

#[tokio::test]
async fn restart_marks_in_flight_jobs_interrupted() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());

    let in_flight = {
        let store = JobStore::open(config.records_dir()).await.unwrap();
        let record = store
            .create(JobParameters::default(), root.path().join("source.mp4"))
            .await
            .unwrap();
        for state in [JobState::Processing, JobState::ExtractingAudio, JobState::Transcribing] {
            store
                .update(&record.id, |r: &mut JobRecord| r.advance(state, "working"))
                .await
                .unwrap();
        }
        record.id
    };

    // Artifacts left behind by a delete that never finished
    let artifacts = ArtifactStore::open(config.data_dir.clone()).await.unwrap();
    let orphan = hclip_models::JobId::new();
    let orphan_paths = artifacts.prepare(&orphan).await.unwrap();

    let fakes = Fakes::default();
    let service = start(root.path(), &fakes).await;

    let record = service.status(&in_flight).await.unwrap();
    assert_eq!(record.status, JobState::Failed);
    assert_eq!(record.progress, 45);
    let error = record.error.unwrap();
    assert_eq!(error.kind, FailureKind::Interrupted);
    assert_eq!(error.stage, JobState::Transcribing);
    assert!(!orphan_paths.root().exists());
}

#[tokio::test]
async fn invalid_submissions_create_no_job() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes::default();
    let service = start_with(root.path(), &fakes, |c| c.max_upload_bytes = 1024).await;

    let video = upload(root.path(), "talk.mp4").await;

    let bad_ext = service.submit(JobParameters::default(), &video, "talk.exe").await;
    assert!(matches!(bad_ext, Err(WorkerError::Validation(_))));

    let too_many = JobParameters {
        max_clips: 0,
        ..JobParameters::default()
    };
    let bad_params = service.submit(too_many, &video, "talk.mp4").await;
    assert!(matches!(bad_params, Err(WorkerError::Validation(_))));

    let inverted = JobParameters {
        min_clip_duration: 60.0,
        max_clip_duration: 30.0,
        ..JobParameters::default()
    };
    let bad_bounds = service.submit(inverted, &video, "talk.mp4").await;
    assert!(matches!(bad_bounds, Err(WorkerError::Validation(_))));

    let empty = root.path().join("uploads/empty.mp4");
    tokio::fs::write(&empty, b"").await.unwrap();
    let empty_file = service.submit(JobParameters::default(), &empty, "empty.mp4").await;
    assert!(matches!(empty_file, Err(WorkerError::Validation(_))));

    let large = root.path().join("uploads/large.mp4");
    tokio::fs::write(&large, vec![0u8; 2048]).await.unwrap();
    let too_large = service.submit(JobParameters::default(), &large, "large.mp4").await;
    assert!(matches!(too_large, Err(WorkerError::Validation(_))));

    for url in ["", "ftp://example.com/talk.mp4", "youtube.com/watch?v=abc"] {
        let bad_url = service.submit_url(JobParameters::default(), url).await;
        assert!(matches!(bad_url, Err(WorkerError::Validation(_))), "{url:?}");
    }
    let too_many = JobParameters {
        max_clips: 0,
        ..JobParameters::default()
    };
    let bad_url_params = service.submit_url(too_many, "https://youtu.be/abc123def45").await;
    assert!(matches!(bad_url_params, Err(WorkerError::Validation(_))));

    assert!(service.list().await.is_empty());
    let job_dirs = std::fs::read_dir(root.path().join("data/jobs")).unwrap().count();
    assert_eq!(job_dirs, 0);
    assert!(video.exists());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes::default();
    let service = start(root.path(), &fakes).await;
    let id = hclip_models::JobId::new();

    assert!(matches!(service.status(&id).await, Err(WorkerError::NotFound(_))));
    assert!(matches!(service.delete(&id).await, Err(WorkerError::NotFound(_))));
    assert!(matches!(service.fetch_clip(&id, 0, false).await, Err(WorkerError::NotFound(_))));
}

#[tokio::test]
async fn shutdown_waits_for_running_jobs_and_rejects_new_ones() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes::default();
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    assert!(service.shutdown().await);

    let record = service.status(&job.id).await.unwrap();
    assert!(record.status == JobState::Completed || record.status == JobState::Pending);

    let video = upload(root.path(), "late.mp4").await;
    let late = service.submit(JobParameters::default(), &video, "late.mp4").await;
    assert!(matches!(late, Err(WorkerError::ShuttingDown)));
}


#[tokio::test]
async fn url_submission_downloads_before_processing() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes::default();
    let service = start(root.path(), &fakes).await;

    let submitted = service
        .submit_url(JobParameters::default(), " https://cdn.example.com/media/talk.webm ")
        .await
        .unwrap();
    assert_eq!(submitted.status, JobState::Pending);
    assert_eq!(submitted.source_url.as_deref(), Some("https://cdn.example.com/media/talk.webm"));
    assert!(submitted.source_path.ends_with("source.webm"));

    let history = poll_until(&service, &submitted.id, |r| r.is_terminal()).await;
    let progress: Vec<u8> = history.iter().map(|r| r.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);

    let record = history.last().unwrap();
    assert_eq!(record.status, JobState::Completed);
    assert_eq!(fakes.downloader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(record.source.as_ref().unwrap().filename, "source.webm");
    assert!(record.source_path.exists());
    assert_eq!(record.clips.len(), 3);
}

#[tokio::test]
async fn failed_download_fails_in_downloading() {
    let root = TempDir::new().unwrap();
    let fakes = Fakes {
        downloader: Arc::new(FakeDownloader {
            fail: true,
            ..FakeDownloader::default()
        }),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = service
        .submit_url(JobParameters::default(), "https://www.youtube.com/watch?v=gone")
        .await
        .unwrap();
    let record = wait_terminal(&service, &job.id).await;

    assert_eq!(record.status, JobState::Failed);
    assert_eq!(record.progress, 2);
    let error = record.error.unwrap();
    assert_eq!(error.stage, JobState::Downloading);
    assert_eq!(error.kind, FailureKind::InvalidInput);
    assert!(error.message.contains("Video unavailable"));
    assert_eq!(fakes.audio.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_during_trimming_leaves_record_in_trimming() {
    let root = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let fakes = Fakes {
        renderer: Arc::new(FakeRenderer::gated(Arc::clone(&gate))),
        ..Fakes::default()
    };
    let harness = pipeline_harness(root.path(), &fakes, JobParameters::default()).await;
    let id = harness.record.id.clone();

    let cancel = CancellationToken::new();
    let pipeline = Arc::clone(&harness.pipeline);
    let run = tokio::spawn({
        let (id, cancel) = (id.clone(), cancel.clone());
        async move { pipeline.run(id, cancel).await }
    });

    fakes.renderer.started.notified().await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

    let record = harness.store.get(&id).await.unwrap();
    assert_eq!(record.status, JobState::Trimming);
    assert!(record.clips.is_empty());
    assert!(record.error.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_while_completion_waits_for_the_record_lock() {
    let root = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let fakes = Fakes {
        analyzer: Arc::new(FakeAnalyzer::new(vec![key_point("Ownership", 10.0, 40.0)])),
        renderer: Arc::new(FakeRenderer::gated(Arc::clone(&gate))),
        ..Fakes::default()
    };
    let parameters = JobParameters {
        include_captions: false,
        ..JobParameters::default()
    };
    let harness = pipeline_harness(root.path(), &fakes, parameters).await;
    let id = harness.record.id.clone();

    let cancel = CancellationToken::new();
    let pipeline = Arc::clone(&harness.pipeline);
    let run = tokio::spawn({
        let (id, cancel) = (id.clone(), cancel.clone());
        async move { pipeline.run(id, cancel).await }
    });
    fakes.renderer.started.notified().await;

    // Another writer holds the record while the trim finishes
    let held = Arc::new(AtomicBool::new(false));
    let holder = tokio::spawn({
        let (store, id, held) = (Arc::clone(&harness.store), id.clone(), Arc::clone(&held));
        async move {
            store
                .update(&id, |_r: &mut JobRecord| {
                    held.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
                .await
                .unwrap();
        }
    });
    while !held.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    holder.await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

    assert_eq!(fakes.renderer.trims.load(Ordering::SeqCst), 1);
    let record = harness.store.get(&id).await.unwrap();
    assert_ne!(record.status, JobState::Completed);
    assert_eq!(record.status, JobState::Trimming);
    assert!(record.clips.is_empty());
}

#[tokio::test]
async fn delete_during_trimming_removes_everything() {
    let root = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let fakes = Fakes {
        renderer: Arc::new(FakeRenderer::gated(Arc::clone(&gate))),
        ..Fakes::default()
    };
    let service = start(root.path(), &fakes).await;

    let job = submit(&service, root.path(), JobParameters::default()).await;
    let history = poll_until(&service, &job.id, |r| r.status == JobState::Trimming).await;
    fakes.renderer.started.notified().await;

    service.delete(&job.id).await.unwrap();
    // Late permits must not revive the job
    gate.add_permits(10);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(history.iter().all(|r| r.status != JobState::Completed));
    assert!(matches!(service.status(&job.id).await, Err(WorkerError::NotFound(_))));
    assert!(!root.path().join("data/jobs").join(job.id.as_str()).exists());
    assert!(!root.path().join("data/records").join(format!("{}.json", job.id)).exists());
    assert_eq!(fakes.renderer.captions.load(Ordering::SeqCst), 0);
}
