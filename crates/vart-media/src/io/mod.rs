//! Frame-level video I/O.
//!
//! Readers decode a video into `RgbImage` frames and writers encode frames
//! into a container. Backends are tried in order: the first writer backend
//! that opens for a given codec/container wins, which is how chunk encoding
//! and frame re-encoding probe codec availability at runtime.

mod ffmpeg;
#[cfg(feature = "opencv")]
mod cv;
mod y4m;

pub use ffmpeg::{FfmpegReaderBackend, FfmpegWriterBackend};
#[cfg(feature = "opencv")]
pub use cv::{OpenCvReaderBackend, OpenCvWriterBackend};
pub use y4m::{Y4mReaderBackend, Y4mWriterBackend};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Properties of an opened video stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Reported number of frames (may be inaccurate)
    pub frame_count: u64,
}

/// Geometry and rate of frames handed to a writer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self { width, height, fps }
    }

    /// Bytes in one packed RGB24 frame.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Sequential frame source.
pub trait FrameReader: Send {
    fn info(&self) -> VideoInfo;

    /// Next frame, or `None` at end of stream.
    fn read_frame(&mut self) -> MediaResult<Option<RgbImage>>;
}

/// Sequential frame sink bound to one output file.
pub trait FrameWriter: Send {
    /// File being written.
    fn path(&self) -> &Path;

    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()>;

    fn frames_written(&self) -> u64;

    /// Flush and close the file. Returns the number of frames written.
    ///
    /// Encoders that fail late (e.g. while flushing) report it here.
    fn finish(self: Box<Self>) -> MediaResult<u64>;
}

/// Factory for frame readers.
pub trait ReaderBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this backend should be tried for `path`.
    fn supports(&self, path: &Path) -> bool;

    /// Open `path` positioned at `start_frame`.
    fn open(&self, path: &Path, start_frame: u64) -> MediaResult<Box<dyn FrameReader>>;
}

/// Factory for frame writers using one codec/container combination.
pub trait WriterBackend: Send + Sync {
    /// Human-readable codec/container description.
    fn label(&self) -> String;

    /// Container extension without the dot (e.g. `mp4`).
    fn extension(&self) -> &str;

    fn open(&self, path: &Path, format: FrameFormat) -> MediaResult<Box<dyn FrameWriter>>;
}

/// Ordered reader and writer backends.
#[derive(Clone)]
pub struct MediaIo {
    readers: Vec<Arc<dyn ReaderBackend>>,
    writers: Vec<Arc<dyn WriterBackend>>,
}

impl std::fmt::Debug for MediaIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaIo")
            .field("readers", &self.reader_names())
            .field("writers", &self.writer_labels())
            .finish()
    }
}

impl Default for MediaIo {
    fn default() -> Self {
        Self::default_backends()
    }
}

impl MediaIo {
    /// Empty backend lists.
    pub fn new() -> Self {
        Self {
            readers: Vec::new(),
            writers: Vec::new(),
        }
    }

    /// Production preference order.
    ///
    /// Writers: `libx264`/mp4, `mpeg4`/avi, `mjpeg`/avi, the OpenCV fourcc
    /// list when compiled in, and finally YUV4MPEG2 which never depends on
    /// external codecs.
    pub fn default_backends() -> Self {
        let mut io = Self::new()
            .with_reader(Y4mReaderBackend)
            .with_reader(FfmpegReaderBackend::new());

        #[cfg(feature = "opencv")]
        {
            io = io.with_reader(OpenCvReaderBackend);
        }

        io = io
            .with_writer(FfmpegWriterBackend::libx264())
            .with_writer(FfmpegWriterBackend::mpeg4())
            .with_writer(FfmpegWriterBackend::mjpeg());

        #[cfg(feature = "opencv")]
        {
            for backend in OpenCvWriterBackend::default_list() {
                io = io.with_writer(backend);
            }
        }

        io.with_writer(Y4mWriterBackend)
    }

    /// Pure-Rust YUV4MPEG2 reading and writing only.
    pub fn y4m_only() -> Self {
        Self::new()
            .with_reader(Y4mReaderBackend)
            .with_writer(Y4mWriterBackend)
    }

    pub fn with_reader(mut self, backend: impl ReaderBackend + 'static) -> Self {
        self.readers.push(Arc::new(backend));
        self
    }

    pub fn with_writer(mut self, backend: impl WriterBackend + 'static) -> Self {
        self.writers.push(Arc::new(backend));
        self
    }

    pub fn reader_names(&self) -> Vec<String> {
        self.readers.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn writer_labels(&self) -> Vec<String> {
        self.writers.iter().map(|w| w.label()).collect()
    }

    /// Open `path` with the first reader backend that accepts it.
    pub fn open_reader(&self, path: &Path, start_frame: u64) -> MediaResult<Box<dyn FrameReader>> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let mut last_error = None;
        for backend in self.readers.iter().filter(|b| b.supports(path)) {
            match backend.open(path, start_frame) {
                Ok(reader) => {
                    debug!(backend = backend.name(), path = %path.display(), "Opened reader");
                    return Ok(reader);
                }
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Reader backend failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MediaError::UnsupportedFormat(format!("no reader for {}", path.display()))
        }))
    }

    /// Open a writer for `stem` using the first backend that works.
    ///
    /// The output path is `stem` with the backend's extension. Partial files
    /// left by failed backends are removed.
    pub fn open_writer(&self, stem: &Path, format: FrameFormat) -> MediaResult<Box<dyn FrameWriter>> {
        let mut attempted = Vec::with_capacity(self.writers.len());

        for backend in &self.writers {
            let path = output_path_for(stem, backend.extension());
            match backend.open(&path, format) {
                Ok(writer) => {
                    debug!(backend = %backend.label(), path = %path.display(), "Opened writer");
                    return Ok(writer);
                }
                Err(e) => {
                    warn!(backend = %backend.label(), error = %e, "Writer backend unavailable");
                    let _ = std::fs::remove_file(&path);
                    attempted.push(backend.label());
                }
            }
        }

        Err(MediaError::WriterUnavailable { attempted })
    }
}

/// `stem` with `extension` appended to its file name.
fn output_path_for(stem: &Path, extension: &str) -> PathBuf {
    let mut name = stem.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(extension);
    stem.with_file_name(name)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Writer backends with scripted failures.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Refuses to open.
    pub struct RefusingWriter {
        pub label: &'static str,
        pub extension: &'static str,
        pub opens: Arc<AtomicUsize>,
    }

    impl WriterBackend for RefusingWriter {
        fn label(&self) -> String {
            self.label.to_string()
        }

        fn extension(&self) -> &str {
            self.extension
        }

        fn open(&self, _path: &Path, _format: FrameFormat) -> MediaResult<Box<dyn FrameWriter>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(MediaError::UnsupportedFormat(format!("{} refused", self.label)))
        }
    }
}
