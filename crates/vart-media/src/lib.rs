//! Media processing for video art styling.
//!
//! This crate provides:
//! - Frame readers and writers over FFmpeg pipes, YUV4MPEG2 and (optionally) OpenCV
//! - The `FrameEffect` capability, its registry and the built-in art styles
//! - Chunk planning, per-chunk encoding and chunk concatenation
//! - FFmpeg command building and ffprobe metadata
//!
//! Frame I/O is attempt-and-check: every backend list is ordered and the
//! first backend that actually opens wins.

pub mod command;
pub mod concat;
pub mod effects;
pub mod encoder;
pub mod error;
pub mod fs_utils;
pub mod io;
pub mod metrics;
pub mod planner;
pub mod probe;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::{
    ConcatOutcome, ConcatStrategy, Concatenator, FfmpegConcat, LargestChunkCopy, ReencodeConcat,
};
pub use effects::{apply_effect, EffectError, EffectRegistry, FrameEffect};
pub use encoder::{ChunkEncoder, ChunkOutput, ChunkProgress, ChunkRequest};
pub use error::{MediaError, MediaResult};
pub use io::{FrameFormat, FrameReader, FrameWriter, MediaIo, ReaderBackend, VideoInfo, WriterBackend};
pub use planner::{ChunkPlanner, ChunkRange};
pub use probe::probe_video;
