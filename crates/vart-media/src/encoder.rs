//! Encoding one chunk: read, crop, resize, style, write.

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use vart_models::{CropRect, JobId, ResizeTarget, StyleId};

use crate::effects::{apply_effect, EffectRegistry, FrameEffect};
use crate::error::{MediaError, MediaResult};
use crate::io::{FrameFormat, FrameWriter, MediaIo};
use crate::planner::ChunkRange;

/// Frames processed between progress reports and scheduler yields.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Progress inside a chunk never reaches 100 before the writer is closed.
const MAX_CHUNK_PERCENT: f32 = 95.0;

/// Everything needed to encode one chunk.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub job_id: JobId,
    pub source: PathBuf,
    /// Output path without extension; the writer backend picks it.
    pub output_stem: PathBuf,
    pub range: ChunkRange,
    pub style: StyleId,
    pub intensity: f32,
    pub crop: Option<CropRect>,
    pub resize: Option<ResizeTarget>,
}

/// A successfully written chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutput {
    pub index: usize,
    pub path: PathBuf,
    /// Frames actually written
    pub frames: u64,
    /// Frames the range asked for
    pub frames_requested: u64,
    pub width: u32,
    pub height: u32,
}

impl ChunkOutput {
    /// The source ended before the range did.
    pub fn is_partial(&self) -> bool {
        self.frames < self.frames_requested
    }
}

/// Progress report for one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    pub chunk: usize,
    pub frames_done: u64,
    pub frames_requested: u64,
    /// Share of the chunk done, in `[0, 95]`
    pub percent: f32,
}

impl ChunkProgress {
    fn new(chunk: usize, frames_done: u64, frames_requested: u64) -> Self {
        let percent = if frames_requested == 0 {
            0.0
        } else {
            (frames_done as f32 / frames_requested as f32 * 100.0).min(MAX_CHUNK_PERCENT)
        };
        Self {
            chunk,
            frames_done,
            frames_requested,
            percent,
        }
    }
}

/// Encodes chunk ranges with a style effect applied to every frame.
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    io: MediaIo,
    effects: Arc<EffectRegistry>,
    batch_size: usize,
}

impl ChunkEncoder {
    pub fn new(io: MediaIo, effects: Arc<EffectRegistry>) -> Self {
        Self {
            io,
            effects,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn io(&self) -> &MediaIo {
        &self.io
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    /// Encode one chunk.
    ///
    /// Stops early without error if the source ends before `range.end`.
    /// A range that starts at or past the real end of the source yields
    /// `EndOfStream` and leaves no file behind. Other failures are wrapped in
    /// `ChunkProcessing`; partial output files are left for the caller to
    /// clean up.
    pub async fn encode<F>(&self, request: &ChunkRequest, on_progress: F) -> MediaResult<ChunkOutput>
    where
        F: FnMut(ChunkProgress),
    {
        let index = request.range.index;
        self.encode_inner(request, on_progress)
            .await
            .map_err(|e| match e {
                e @ MediaError::EndOfStream { .. } => e,
                e => MediaError::chunk_failed(index, e),
            })
    }

    async fn encode_inner<F>(&self, request: &ChunkRequest, mut on_progress: F) -> MediaResult<ChunkOutput>
    where
        F: FnMut(ChunkProgress),
    {
        let started = Instant::now();
        let range = request.range;
        let effect = self.effects.resolve(&request.style)?;

        let mut reader = self.io.open_reader(&request.source, range.start)?;
        let info = reader.info();
        let crop = request.crop.map(|c| c.clamp_to(info.width, info.height));
        let (width, height) = output_size(info.width, info.height, crop, request.resize);

        let mut writer = self
            .io
            .open_writer(&request.output_stem, FrameFormat::new(width, height, info.fps))?;

        debug!(
            job_id = %request.job_id,
            chunk = range.index,
            start = range.start,
            end = range.end,
            path = %writer.path().display(),
            "Encoding chunk"
        );

        let requested = range.len();
        let mut done = 0u64;
        on_progress(ChunkProgress::new(range.index, 0, requested));

        'batches: while done < requested {
            let batch_end = (done + self.batch_size as u64).min(requested);
            while done < batch_end {
                let Some(frame) = reader.read_frame()? else {
                    break 'batches;
                };
                let styled = process_frame(
                    &frame,
                    crop,
                    (width, height),
                    effect.as_ref(),
                    request.intensity,
                );
                writer.write_frame(&styled)?;
                done += 1;
            }
            on_progress(ChunkProgress::new(range.index, done, requested));
            tokio::task::yield_now().await;
        }

        if done == 0 {
            let path = writer.path().to_path_buf();
            let _ = writer.finish();
            let _ = std::fs::remove_file(&path);
            return Err(MediaError::EndOfStream {
                chunk: range.index,
                start: range.start,
            });
        }

        if done < requested {
            warn!(
                job_id = %request.job_id,
                chunk = range.index,
                frames = done,
                requested,
                "Source ended before chunk end"
            );
            on_progress(ChunkProgress::new(range.index, done, requested));
        }

        finish_writer(writer, range.index, width, height, requested, started)
    }
}

fn finish_writer(
    writer: Box<dyn FrameWriter>,
    index: usize,
    width: u32,
    height: u32,
    requested: u64,
    started: Instant,
) -> MediaResult<ChunkOutput> {
    let path = writer.path().to_path_buf();
    let frames = writer.finish()?;
    let kind = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("unknown")
        .to_string();
    crate::metrics::record_chunk_encoded(&kind, frames, started.elapsed().as_secs_f64());

    info!(
        chunk = index,
        frames,
        path = %path.display(),
        "Chunk encoded in {:.2}s",
        started.elapsed().as_secs_f64()
    );

    Ok(ChunkOutput {
        index,
        path,
        frames,
        frames_requested: requested,
        width,
        height,
    })
}

/// Output geometry: resize target, else crop size, else source size.
pub fn output_size(
    src_width: u32,
    src_height: u32,
    crop: Option<CropRect>,
    resize: Option<ResizeTarget>,
) -> (u32, u32) {
    match (resize, crop) {
        (Some(r), _) if r.is_valid() => (r.width, r.height),
        (_, Some(c)) => (c.width, c.height),
        _ => (src_width, src_height),
    }
}

/// Crop, resize, then style one frame.
fn process_frame(
    frame: &RgbImage,
    crop: Option<CropRect>,
    (width, height): (u32, u32),
    effect: &dyn FrameEffect,
    intensity: f32,
) -> RgbImage {
    let cropped = match crop {
        Some(c) => {
            let c = c.clamp_to(frame.width(), frame.height());
            imageops::crop_imm(frame, c.x, c.y, c.width, c.height).to_image()
        }
        None => frame.clone(),
    };

    let sized = if cropped.dimensions() == (width, height) {
        cropped
    } else {
        imageops::resize(&cropped, width, height, FilterType::Triangle)
    };

    apply_effect(effect, &sized, intensity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::RefusingWriter;
    use crate::io::{FrameReader, Y4mWriterBackend};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_source(path: &Path, frames: u32, w: u32, h: u32) {
        let backend = Y4mWriterBackend;
        let mut writer = crate::io::WriterBackend::open(&backend, path, FrameFormat::new(w, h, 30.0)).unwrap();
        for i in 0..frames {
            let frame = RgbImage::from_fn(w, h, |x, y| image::Rgb([(x + i) as u8, y as u8, 128]));
            writer.write_frame(&frame).unwrap();
        }
        writer.finish().unwrap();
    }

    fn request(dir: &TempDir, source: &Path, range: ChunkRange) -> ChunkRequest {
        ChunkRequest {
            job_id: JobId::from_string("job"),
            source: source.to_path_buf(),
            output_stem: dir.path().join(format!("job_chunk_{:03}", range.index)),
            range,
            style: StyleId::new("pencil"),
            intensity: 0.5,
            crop: None,
            resize: None,
        }
    }

    fn encoder() -> ChunkEncoder {
        ChunkEncoder::new(MediaIo::y4m_only(), Arc::new(EffectRegistry::with_builtin_styles()))
    }

    #[tokio::test]
    async fn test_encode_full_chunk_reports_progress() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.y4m");
        write_source(&source, 12, 32, 24);

        let mut reports = Vec::new();
        let out = encoder()
            .encode(
                &request(&dir, &source, ChunkRange { index: 0, start: 0, end: 12 }),
                |p| reports.push(p),
            )
            .await
            .unwrap();

        assert_eq!(out.frames, 12);
        assert!(!out.is_partial());
        assert_eq!(out.path, dir.path().join("job_chunk_000.y4m"));
        assert!(reports.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(reports.iter().all(|p| p.percent <= 95.0));
        assert_eq!(reports.last().unwrap().frames_done, 12);
        // Initial report plus one per batch of five.
        assert_eq!(reports.len(), 4);
    }

    #[tokio::test]
    async fn test_short_source_yields_partial_chunk() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.y4m");
        write_source(&source, 7, 16, 16);

        let out = encoder()
            .encode(
                &request(&dir, &source, ChunkRange { index: 1, start: 3, end: 20 }),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(out.frames, 4);
        assert_eq!(out.frames_requested, 17);
        assert!(out.is_partial());
        let reader = MediaIo::y4m_only().open_reader(&out.path, 0).unwrap();
        assert_eq!(reader.info().frame_count, 4);
    }

    #[tokio::test]
    async fn test_crop_beyond_bounds_is_clamped() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.y4m");
        write_source(&source, 2, 64, 48);

        let mut req = request(&dir, &source, ChunkRange { index: 0, start: 0, end: 2 });
        req.crop = Some(CropRect::new(0, 0, 10_000, 10_000));
        let out = encoder().encode(&req, |_| {}).await.unwrap();
        assert_eq!((out.width, out.height), (64, 48));
    }

    #[tokio::test]
    async fn test_resize_wins_over_crop() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.y4m");
        write_source(&source, 2, 64, 48);

        let mut req = request(&dir, &source, ChunkRange { index: 0, start: 0, end: 2 });
        req.crop = Some(CropRect::new(8, 8, 20, 20));
        req.resize = Some(ResizeTarget::new(40, 30));
        let out = encoder().encode(&req, |_| {}).await.unwrap();
        assert_eq!((out.width, out.height), (40, 30));

        let mut reader = MediaIo::y4m_only().open_reader(&out.path, 0).unwrap();
        assert_eq!(reader.read_frame().unwrap().unwrap().dimensions(), (40, 30));
    }

    #[tokio::test]
    async fn test_no_writer_is_chunk_failure() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.y4m");
        write_source(&source, 2, 16, 16);

        let opens = Arc::new(AtomicUsize::new(0));
        let io = MediaIo::new()
            .with_reader(crate::io::Y4mReaderBackend)
            .with_writer(RefusingWriter {
                label: "x264 (.mp4)",
                extension: "mp4",
                opens: opens.clone(),
            });
        let encoder = ChunkEncoder::new(io, Arc::new(EffectRegistry::with_builtin_styles()));

        let err = encoder
            .encode(&request(&dir, &source, ChunkRange { index: 2, start: 0, end: 2 }), |_| {})
            .await
            .unwrap_err();
        match err {
            MediaError::ChunkProcessing { chunk, source } => {
                assert_eq!(chunk, 2);
                assert!(matches!(*source, MediaError::WriterUnavailable { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_style_is_permanent() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.y4m");
        write_source(&source, 2, 16, 16);

        let mut req = request(&dir, &source, ChunkRange { index: 0, start: 0, end: 2 });
        req.style = StyleId::new("neon");
        let err = encoder().encode(&req, |_| {}).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_range_past_end_of_source_is_end_of_stream() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.y4m");
        write_source(&source, 3, 16, 16);

        let err = encoder()
            .encode(&request(&dir, &source, ChunkRange { index: 4, start: 10, end: 20 }), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::EndOfStream { chunk: 4, start: 10 }));
        assert!(!dir.path().join("job_chunk_004.y4m").exists());
    }

    #[test]
    fn test_output_size_precedence() {
        let crop = Some(CropRect::new(0, 0, 100, 50));
        let resize = Some(ResizeTarget::new(320, 240));
        assert_eq!(output_size(640, 480, None, None), (640, 480));
        assert_eq!(output_size(640, 480, crop, None), (100, 50));
        assert_eq!(output_size(640, 480, crop, resize), (320, 240));
    }
}
