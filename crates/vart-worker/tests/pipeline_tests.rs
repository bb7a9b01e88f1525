//! End-to-end pipeline tests on the YUV4MPEG2 backend (no external binaries).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use vart_media::io::{
    FrameFormat, FrameReader, FrameWriter, ReaderBackend, VideoInfo, WriterBackend,
    Y4mReaderBackend, Y4mWriterBackend,
};
use vart_media::{
    Concatenator, EffectRegistry, LargestChunkCopy, MediaError, MediaIo, MediaResult,
    ReencodeConcat,
};
use vart_models::{
    CropRect, Job, JobStatus, ProcessingParams, ProgressStatus, ResizeTarget, TrimWindow,
};
use vart_worker::{
    InMemoryJobStore, JobStore, JobRunner, ProgressStore, SnapshotSource, StatusService,
    WorkerConfig,
};

/// Refuses to open the first `failures` times, then writes YUV4MPEG2.
struct FlakyWriter {
    failures: usize,
    opens: Arc<AtomicUsize>,
}

impl FlakyWriter {
    fn always_failing() -> Self {
        Self {
            failures: usize::MAX,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl WriterBackend for FlakyWriter {
    fn label(&self) -> String {
        "flaky (.y4m)".to_string()
    }

    fn extension(&self) -> &str {
        "y4m"
    }

    fn open(&self, path: &Path, format: FrameFormat) -> MediaResult<Box<dyn FrameWriter>> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(MediaError::UnsupportedFormat("encoder busy".into()));
        }
        Y4mWriterBackend.open(path, format)
    }
}

/// YUV4MPEG2 reader whose stream info claims `extra` frames that do not exist,
/// like a container whose duration includes a longer audio track.
struct OverReportingReader {
    extra: u64,
}

struct OverReported {
    inner: Box<dyn FrameReader>,
    extra: u64,
}

impl FrameReader for OverReported {
    fn info(&self) -> VideoInfo {
        let mut info = self.inner.info();
        info.frame_count += self.extra;
        info
    }

    fn read_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        self.inner.read_frame()
    }
}

impl ReaderBackend for OverReportingReader {
    fn name(&self) -> &str {
        "over-reporting y4m"
    }

    fn supports(&self, _path: &Path) -> bool {
        true
    }

    fn open(&self, path: &Path, start_frame: u64) -> MediaResult<Box<dyn FrameReader>> {
        Ok(Box::new(OverReported {
            inner: Y4mReaderBackend.open(path, start_frame)?,
            extra: self.extra,
        }))
    }
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    store: InMemoryJobStore,
    progress: ProgressStore,
    runner: JobRunner,
}

impl Harness {
    fn new(io: MediaIo, tune: impl FnOnce(&mut WorkerConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let mut config = WorkerConfig {
            work_dir: root.join("work"),
            backoff_base: Duration::from_millis(1),
            ..Default::default()
        };
        tune(&mut config);

        let store = InMemoryJobStore::new();
        let progress = ProgressStore::new();
        let concat = Concatenator::new(vec![
            Arc::new(ReencodeConcat::new(MediaIo::y4m_only())),
            Arc::new(LargestChunkCopy),
        ]);
        let runner = JobRunner::new(config, Arc::new(store.clone()), progress.clone())
            .with_media(io, Arc::new(EffectRegistry::with_builtin_styles()))
            .with_concatenator(concat);

        Self {
            _dir: dir,
            root,
            store,
            progress,
            runner,
        }
    }

    fn y4m() -> Self {
        Self::new(MediaIo::y4m_only(), |_| {})
    }

    fn source(&self, frames: u32, width: u32, height: u32) -> PathBuf {
        let path = self.root.join("source.y4m");
        let mut writer = Y4mWriterBackend
            .open(&path, FrameFormat::new(width, height, 30.0))
            .unwrap();
        for i in 0..frames {
            let frame = RgbImage::from_fn(width, height, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, (i * 3 % 256) as u8])
            });
            writer.write_frame(&frame).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn job(&self, source: &Path, params: ProcessingParams) -> Job {
        let job = Job::new(source, self.root.join("out").join("styled.mp4"), params);
        self.store.insert(job.clone());
        job
    }
}

fn frame_count(path: &Path) -> (u64, u32, u32) {
    let reader = MediaIo::y4m_only().open_reader(path, 0).unwrap();
    let info = reader.info();
    (info.frame_count, info.width, info.height)
}

#[tokio::test]
async fn ninety_frame_pencil_job_completes_as_single_chunk() {
    let h = Harness::y4m();
    let source = h.source(90, 640, 480);
    let job = h.job(&source, ProcessingParams::new("pencil").with_intensity(0.5));

    let report = h.runner.run(&job).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.concat_strategy.as_deref(), Some("single_chunk"));
    let output = report.output_path.clone().unwrap();
    assert!(std::fs::metadata(&output).unwrap().len() >= 1000);
    assert_eq!(frame_count(&output), (90, 640, 480));

    let record = h.progress.get(&job.id).unwrap();
    assert_eq!(record.status, ProgressStatus::Completed);
    assert_eq!(record.progress, 100.0);

    let persisted = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, JobStatus::Completed);
    assert_eq!(persisted.result_path, Some(output));
    assert_eq!(persisted.source_info.unwrap().total_frames, 90);
}

#[tokio::test]
async fn multi_chunk_job_keeps_every_frame() {
    let h = Harness::new(MediaIo::y4m_only(), |c| {
        c.chunk_min = 10;
        c.chunk_max = 20;
    });
    let source = h.source(125, 24, 16);
    let job = h.job(&source, ProcessingParams::new("watercolor").with_intensity(0.8));

    let report = h.runner.run(&job).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.concat_strategy.as_deref(), Some("frame_reencode"));
    assert!(!report.degraded);
    assert_eq!(frame_count(&report.output_path.unwrap()), (125, 24, 16));
    // Chunk files and attempt directories are gone.
    assert!(!h.root.join("work").join(job.id.as_str()).exists());
}

#[tokio::test]
async fn over_reported_frame_count_completes_with_real_frames() {
    // 100 reported frames in chunks of 20: 40 ends on a chunk boundary, 45
    // inside a chunk.
    for real in [40u32, 45] {
        let io = MediaIo::new()
            .with_reader(OverReportingReader { extra: 100 - real as u64 })
            .with_writer(Y4mWriterBackend);
        let h = Harness::new(io, |c| {
            c.chunk_target = 5;
            c.chunk_min = 10;
            c.chunk_max = 20;
        });
        let source = h.source(real, 24, 16);
        let job = h.job(&source, ProcessingParams::new("pencil"));

        let report = h.runner.run(&job).await;

        assert!(report.is_completed(), "{} frames: {:?}", real, report.error);
        assert_eq!(report.attempts, 1);
        assert_eq!(frame_count(&report.output_path.unwrap()), (real as u64, 24, 16));
        assert!(!h.root.join("work").join(job.id.as_str()).exists());
    }
}

#[tokio::test]
async fn always_failing_encoder_exhausts_attempts_with_growing_backoff() {
    let io = MediaIo::new()
        .with_reader(vart_media::io::Y4mReaderBackend)
        .with_writer(FlakyWriter::always_failing());
    let h = Harness::new(io, |_| {});
    let source = h.source(20, 16, 16);
    let job = h.job(&source, ProcessingParams::new("anime"));

    let report = h.runner.run(&job).await;

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts, 3);
    assert_eq!(
        report.backoff_waits,
        vec![Duration::from_millis(2), Duration::from_millis(4)]
    );
    let error = report.error.unwrap();
    assert!(error.starts_with("Processing failed after 3 attempts"), "{}", error);

    let record = h.progress.get(&job.id).unwrap();
    assert_eq!(record.status, ProgressStatus::Failed);
    assert_eq!(record.progress, 0.0);
    let persisted = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, JobStatus::Failed);
    assert_eq!(persisted.error_message.as_deref(), Some(error.as_str()));
    assert!(persisted.result_path.is_none());
}

#[tokio::test]
async fn failure_then_success_reports_clean_completion() {
    let io = MediaIo::new()
        .with_reader(vart_media::io::Y4mReaderBackend)
        .with_writer(FlakyWriter::failing_first(1));
    let h = Harness::new(io, |_| {});
    let source = h.source(30, 16, 16);
    let job = h.job(&source, ProcessingParams::new("vintage_film"));

    let report = h.runner.run(&job).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.backoff_waits, vec![Duration::from_millis(2)]);

    let record = h.progress.get(&job.id).unwrap();
    assert_eq!(record.status, ProgressStatus::Completed);
    assert_eq!(record.progress, 100.0);
    assert!(!record.message.contains("failed"));
}

#[tokio::test]
async fn oversized_crop_is_clamped() {
    let h = Harness::y4m();
    let source = h.source(12, 64, 48);
    let job = h.job(
        &source,
        ProcessingParams::new("oil_painting").with_crop(CropRect::new(0, 0, 10_000, 10_000)),
    );

    let report = h.runner.run(&job).await;

    assert!(report.is_completed(), "{:?}", report.error);
    let (_, width, height) = frame_count(&report.output_path.unwrap());
    assert!(width <= 64 && height <= 48);
    assert_eq!((width, height), (64, 48));
}

#[tokio::test]
async fn trim_and_resize_shape_the_output() {
    let h = Harness::y4m();
    let source = h.source(90, 32, 32);
    let job = h.job(
        &source,
        ProcessingParams::new("cartoon")
            .with_trim(TrimWindow::new(1.0, Some(2.0)))
            .with_resize(ResizeTarget::new(20, 12)),
    );

    let report = h.runner.run(&job).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(frame_count(&report.output_path.unwrap()), (30, 20, 12));
}

#[tokio::test]
async fn status_falls_back_to_persisted_job() {
    let h = Harness::y4m();
    let source = h.source(10, 16, 16);
    let job = h.job(&source, ProcessingParams::new("pencil"));
    h.runner.run(&job).await;

    // A restarted process has an empty progress store.
    let status = StatusService::new(ProgressStore::new(), Arc::new(h.store.clone()));
    let snapshot = status.get_progress(&job.id).await.unwrap().unwrap();
    assert_eq!(snapshot.source, SnapshotSource::Persisted);
    assert_eq!(snapshot.message, "Project status: completed");
    assert_eq!(snapshot.progress, 100.0);

    let live = StatusService::new(h.progress.clone(), Arc::new(h.store.clone()))
        .get_progress(&job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.source, SnapshotSource::Live);
    assert_eq!(live.status, "completed");
}

#[tokio::test]
async fn submitted_jobs_run_concurrently_without_collisions() {
    let h = Harness::new(MediaIo::y4m_only(), |c| c.max_concurrent_jobs = 2);
    let source = h.source(15, 16, 16);

    let handles: Vec<_> = ["pencil", "anime", "watercolor"]
        .iter()
        .enumerate()
        .map(|(i, style)| {
            let job = Job::new(
                &source,
                h.root.join(format!("out-{}", i)).join("styled.mp4"),
                ProcessingParams::new(*style),
            );
            h.store.insert(job.clone());
            h.runner.submit(job)
        })
        .collect();

    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.is_completed(), "{:?}", report.error);
    }
    assert_eq!(h.progress.active_count(), 0);
}
