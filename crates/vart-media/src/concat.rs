//! Joining chunk files into the final output.
//!
//! Strategies are tried in order until one produces a non-empty file:
//! FFmpeg's concat demuxer, then frame-by-frame re-encoding, then copying
//! the largest chunk as a degraded last resort. A single chunk is moved into
//! place without re-encoding.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{copy_atomic, file_size, move_file, remove_files, with_extension};
use crate::io::{FrameFormat, FrameWriter, MediaIo};

/// Default timeout for the re-encoding concat invocation.
pub const DEFAULT_CONCAT_TIMEOUT_SECS: u64 = 300;
/// Default timeout for the stream-copy retry.
pub const DEFAULT_SIMPLE_CONCAT_TIMEOUT_SECS: u64 = 180;

/// What a strategy wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutput {
    pub path: PathBuf,
    /// Frames written, when the strategy counts them
    pub frames: Option<u64>,
}

/// One way of joining chunks.
#[async_trait]
pub trait ConcatStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether success means a lower-quality result than asked for.
    fn degraded(&self) -> bool {
        false
    }

    /// Join `chunks` in order into `output` (or a sibling path with another
    /// extension, reported in the result).
    async fn attempt(&self, chunks: &[PathBuf], output: &Path) -> MediaResult<StrategyOutput>;
}

/// Concat demuxer with a libx264 re-encode, retried once as a stream copy.
#[derive(Debug, Clone)]
pub struct FfmpegConcat {
    program: String,
    timeout_secs: u64,
    simple_timeout_secs: u64,
}

impl Default for FfmpegConcat {
    fn default() -> Self {
        Self::new(DEFAULT_CONCAT_TIMEOUT_SECS, DEFAULT_SIMPLE_CONCAT_TIMEOUT_SECS)
    }
}

impl FfmpegConcat {
    pub fn new(timeout_secs: u64, simple_timeout_secs: u64) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            timeout_secs,
            simple_timeout_secs,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn runner(&self, timeout_secs: u64) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_program(&self.program)
            .with_timeout(timeout_secs)
    }
}

/// Concat-demuxer manifest: one `file '<absolute path>'` line per chunk.
pub fn manifest_contents(chunks: &[PathBuf]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            let abs = std::path::absolute(chunk).unwrap_or_else(|_| chunk.clone());
            let quoted = abs.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", quoted)
        })
        .collect()
}

#[async_trait]
impl ConcatStrategy for FfmpegConcat {
    fn name(&self) -> &str {
        "ffmpeg_concat"
    }

    async fn attempt(&self, chunks: &[PathBuf], output: &Path) -> MediaResult<StrategyOutput> {
        let manifest_dir = chunks
            .first()
            .and_then(|c| c.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);

        // Removed when dropped, whichever way this returns.
        let mut manifest = tempfile::Builder::new()
            .prefix("concat_")
            .suffix(".txt")
            .tempfile_in(&manifest_dir)?;
        manifest.write_all(manifest_contents(chunks).as_bytes())?;
        manifest.flush()?;

        let reencode = FfmpegCommand::new(manifest.path(), output)
            .concat_manifest()
            .video_codec("libx264")
            .preset("fast")
            .crf(23)
            .pixel_format("yuv420p")
            .faststart()
            .no_audio();

        match self.runner(self.timeout_secs).run(&reencode).await {
            Ok(()) => {}
            Err(MediaError::FfmpegNotFound) => return Err(MediaError::FfmpegNotFound),
            Err(e) => {
                warn!(error = %e, "FFmpeg concat failed, retrying with stream copy");
                let copy = FfmpegCommand::new(manifest.path(), output)
                    .concat_manifest()
                    .stream_copy();
                self.runner(self.simple_timeout_secs).run(&copy).await?;
            }
        }

        Ok(StrategyOutput {
            path: output.to_path_buf(),
            frames: None,
        })
    }
}

/// Decode every chunk and write one stream through the writer backends.
///
/// Frames whose size differs from the first chunk's are resized to match.
#[derive(Debug, Clone)]
pub struct ReencodeConcat {
    io: MediaIo,
}

impl ReencodeConcat {
    pub fn new(io: MediaIo) -> Self {
        Self { io }
    }
}

#[async_trait]
impl ConcatStrategy for ReencodeConcat {
    fn name(&self) -> &str {
        "frame_reencode"
    }

    async fn attempt(&self, chunks: &[PathBuf], output: &Path) -> MediaResult<StrategyOutput> {
        let first = chunks
            .first()
            .ok_or_else(|| MediaError::concatenation("no chunks to join"))?;
        let info = self.io.open_reader(first, 0)?.info();
        let (width, height) = (info.width, info.height);

        let stem = output.with_extension("");
        let mut writer = self
            .io
            .open_writer(&stem, FrameFormat::new(width, height, info.fps))?;
        let path = writer.path().to_path_buf();

        let frames = copy_frames(&self.io, chunks, writer.as_mut(), (width, height))
            .await
            .and_then(|()| writer.finish());
        match frames {
            Ok(frames) if frames > 0 => Ok(StrategyOutput {
                path,
                frames: Some(frames),
            }),
            Ok(_) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(MediaError::concatenation("re-encode wrote no frames"))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }
}

/// Stream every readable chunk into `writer`, resizing to `(width, height)`.
async fn copy_frames(
    io: &MediaIo,
    chunks: &[PathBuf],
    writer: &mut dyn FrameWriter,
    (width, height): (u32, u32),
) -> MediaResult<()> {
    for chunk in chunks {
        let mut reader = match io.open_reader(chunk, 0) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(chunk = %chunk.display(), error = %e, "Skipping unreadable chunk");
                continue;
            }
        };
        while let Some(frame) = reader.read_frame()? {
            if frame.dimensions() == (width, height) {
                writer.write_frame(&frame)?;
            } else {
                let resized = imageops::resize(&frame, width, height, FilterType::Triangle);
                writer.write_frame(&resized)?;
            }
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}

/// Copy the largest chunk verbatim so the job still has playable output.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestChunkCopy;

#[async_trait]
impl ConcatStrategy for LargestChunkCopy {
    fn name(&self) -> &str {
        "largest_chunk_copy"
    }

    fn degraded(&self) -> bool {
        true
    }

    async fn attempt(&self, chunks: &[PathBuf], output: &Path) -> MediaResult<StrategyOutput> {
        let mut largest: Option<(&PathBuf, u64)> = None;
        for chunk in chunks {
            let size = file_size(chunk).await;
            if size > largest.map_or(0, |(_, s)| s) {
                largest = Some((chunk, size));
            }
        }
        let (chunk, _) =
            largest.ok_or_else(|| MediaError::concatenation("all chunks are empty"))?;

        let target = keep_container(output, chunk);
        copy_atomic(chunk, &target).await?;
        Ok(StrategyOutput {
            path: target,
            frames: None,
        })
    }
}

/// `output` with the extension of `chunk`, since a copy keeps its container.
fn keep_container(output: &Path, chunk: &Path) -> PathBuf {
    match chunk.extension().and_then(|e| e.to_str()) {
        Some(ext) => with_extension(output, ext),
        None => output.to_path_buf(),
    }
}

/// Result of joining chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatOutcome {
    /// Final output file (extension may differ from the requested path)
    pub path: PathBuf,
    pub bytes: u64,
    /// Frames in the output, when known
    pub frames: Option<u64>,
    /// Strategy that produced the output
    pub strategy: String,
    /// True when only a single chunk's worth of output was salvaged
    pub degraded: bool,
}

/// Ordered list of concatenation strategies.
#[derive(Clone)]
pub struct Concatenator {
    strategies: Vec<Arc<dyn ConcatStrategy>>,
}

impl std::fmt::Debug for Concatenator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Concatenator")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

impl Concatenator {
    pub fn new(strategies: Vec<Arc<dyn ConcatStrategy>>) -> Self {
        Self { strategies }
    }

    /// FFmpeg concat, then frame re-encode, then largest-chunk copy.
    pub fn default_chain(io: MediaIo, timeout_secs: u64, simple_timeout_secs: u64) -> Self {
        Self::new(vec![
            Arc::new(FfmpegConcat::new(timeout_secs, simple_timeout_secs)),
            Arc::new(ReencodeConcat::new(io)),
            Arc::new(LargestChunkCopy),
        ])
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Join `chunks` into `output`. Chunk files are removed afterwards,
    /// whatever the outcome.
    pub async fn concatenate(&self, chunks: &[PathBuf], output: &Path) -> MediaResult<ConcatOutcome> {
        let result = self.join(chunks, output).await;
        remove_files(chunks).await;

        if let Ok(outcome) = &result {
            crate::metrics::record_concat(&outcome.strategy, outcome.degraded);
            info!(
                strategy = %outcome.strategy,
                bytes = outcome.bytes,
                degraded = outcome.degraded,
                path = %outcome.path.display(),
                "Chunks joined"
            );
        }
        result
    }

    async fn join(&self, chunks: &[PathBuf], output: &Path) -> MediaResult<ConcatOutcome> {
        match chunks {
            [] => Err(MediaError::concatenation("no chunks to join")),
            [only] => {
                let target = keep_container(output, only);
                move_file(only, &target).await?;
                let bytes = file_size(&target).await;
                Ok(ConcatOutcome {
                    path: target,
                    bytes,
                    frames: None,
                    strategy: "single_chunk".to_string(),
                    degraded: false,
                })
            }
            _ => self.run_strategies(chunks, output).await,
        }
    }

    async fn run_strategies(&self, chunks: &[PathBuf], output: &Path) -> MediaResult<ConcatOutcome> {
        let mut last_error = None;

        for strategy in &self.strategies {
            debug!(strategy = strategy.name(), chunks = chunks.len(), "Trying concat strategy");
            let result = strategy.attempt(chunks, output).await;
            let error = match result {
                Ok(out) => {
                    let bytes = file_size(&out.path).await;
                    if bytes > 0 {
                        return Ok(ConcatOutcome {
                            path: out.path,
                            bytes,
                            frames: out.frames,
                            strategy: strategy.name().to_string(),
                            degraded: strategy.degraded(),
                        });
                    }
                    remove_files(&[out.path]).await;
                    MediaError::concatenation(format!("{} produced an empty file", strategy.name()))
                }
                Err(e) => e,
            };
            // Later strategies may write a different extension; nothing
            // half-written may stay at the requested path.
            remove_files(&[output.to_path_buf()]).await;

            warn!(strategy = strategy.name(), error = %error, "Concat strategy failed");
            crate::metrics::record_concat_fallback(strategy.name());
            last_error = Some(error);
        }

        Err(MediaError::concatenation(match last_error {
            Some(e) => format!("all strategies failed, last error: {}", e),
            None => "no strategies configured".to_string(),
        }))
    }
}
