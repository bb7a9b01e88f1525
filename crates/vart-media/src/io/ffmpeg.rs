//! Raw RGB frame pipes through the FFmpeg CLI.

use image::RgbImage;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

use super::{FrameFormat, FrameReader, FrameWriter, ReaderBackend, VideoInfo, WriterBackend};
use crate::command::{tail, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// How long a freshly spawned encoder must stay alive to count as opened.
const STARTUP_GRACE: Duration = Duration::from_millis(50);

/// Decodes any FFmpeg-readable file to RGB24 frames.
#[derive(Debug, Clone)]
pub struct FfmpegReaderBackend {
    program: String,
}

impl Default for FfmpegReaderBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegReaderBackend {
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl ReaderBackend for FfmpegReaderBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn supports(&self, _path: &Path) -> bool {
        true
    }

    fn open(&self, path: &Path, start_frame: u64) -> MediaResult<Box<dyn FrameReader>> {
        which::which(&self.program).map_err(|_| MediaError::FfmpegNotFound)?;
        let info = probe_video(path)?;

        let mut cmd = FfmpegCommand::new(path, "pipe:1");
        if start_frame > 0 {
            cmd = cmd.seek(seek_seconds(start_frame, info.fps));
        }
        let cmd = cmd.no_audio().raw_rgb_output();

        let mut child = Command::new(&self.program)
            .args(cmd.build_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout not captured"))?;

        Ok(Box::new(FfmpegReader {
            child,
            stdout,
            info,
            frame_len: info.width as usize * info.height as usize * 3,
            done: false,
        }))
    }
}

/// Input-side seek target for `start_frame`.
///
/// FFmpeg drops frames stamped before the seek point, and the point is
/// printed to the millisecond. Aiming half a frame early keeps `start_frame`
/// and drops its predecessor whatever the rounding.
fn seek_seconds(start_frame: u64, fps: f64) -> f64 {
    ((start_frame as f64 - 0.5) / fps).max(0.0)
}

struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
    info: VideoInfo,
    frame_len: usize,
    done: bool,
}

impl FrameReader for FfmpegReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => Ok(RgbImage::from_raw(self.info.width, self.info.height, buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.done = true;
                let _ = self.child.wait();
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Encodes RGB24 frames piped to FFmpeg with one codec/container.
#[derive(Debug)]
pub struct FfmpegWriterBackend {
    program: String,
    codec: String,
    extension: String,
    extra_args: Vec<String>,
    available: OnceLock<bool>,
}

impl FfmpegWriterBackend {
    pub fn new(codec: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec: codec.into(),
            extension: extension.into(),
            extra_args: Vec::new(),
            available: OnceLock::new(),
        }
    }

    /// H.264 in MP4, the primary choice.
    pub fn libx264() -> Self {
        Self::new("libx264", "mp4").with_args([
            "-preset", "fast", "-crf", "23", "-pix_fmt", "yuv420p",
        ])
    }

    /// MPEG-4 Part 2 in AVI.
    pub fn mpeg4() -> Self {
        Self::new("mpeg4", "avi").with_args(["-q:v", "3", "-pix_fmt", "yuv420p"])
    }

    /// Motion JPEG in AVI.
    pub fn mjpeg() -> Self {
        Self::new("mjpeg", "avi").with_args(["-q:v", "3", "-pix_fmt", "yuvj420p"])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Whether FFmpeg lists this encoder. Cached after the first call.
    fn encoder_listed(&self) -> bool {
        *self.available.get_or_init(|| {
            let output = Command::new(&self.program)
                .args(["-hide_banner", "-encoders"])
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output();
            match output {
                Ok(out) if out.status.success() => {
                    let listing = String::from_utf8_lossy(&out.stdout);
                    listing
                        .lines()
                        .any(|line| line.split_whitespace().nth(1) == Some(self.codec.as_str()))
                }
                _ => false,
            }
        })
    }
}

impl WriterBackend for FfmpegWriterBackend {
    fn label(&self) -> String {
        format!("{} (.{})", self.codec, self.extension)
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    fn open(&self, path: &Path, format: FrameFormat) -> MediaResult<Box<dyn FrameWriter>> {
        which::which(&self.program).map_err(|_| MediaError::FfmpegNotFound)?;
        if !self.encoder_listed() {
            return Err(MediaError::UnsupportedFormat(format!(
                "encoder {} not available",
                self.codec
            )));
        }

        // 4:2:0 encoders need even dimensions.
        let cmd = FfmpegCommand::new("pipe:0", path)
            .raw_rgb_input(format.width, format.height, format.fps)
            .output_args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
            .video_codec(&self.codec)
            .output_args(self.extra_args.iter().cloned());

        let mut child = Command::new(&self.program)
            .args(cmd.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr_handle = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        std::thread::sleep(STARTUP_GRACE);
        if let Some(status) = child.try_wait()? {
            let stderr = join_stderr(stderr_handle);
            return Err(MediaError::ffmpeg_failed(
                format!("{} encoder exited during startup", self.codec),
                Some(stderr),
                status.code(),
            ));
        }

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdin not captured"))?;

        debug!(codec = %self.codec, path = %path.display(), "FFmpeg encoder started");

        Ok(Box::new(FfmpegWriter {
            child,
            stdin: Some(stdin),
            stderr: stderr_handle,
            path: path.to_path_buf(),
            format,
            codec: self.codec.clone(),
            frames: 0,
        }))
    }
}

struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    path: PathBuf,
    format: FrameFormat,
    codec: String,
    frames: u64,
}

impl FrameWriter for FfmpegWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.dimensions() != (self.format.width, self.format.height) {
            return Err(MediaError::UnsupportedFormat(format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.format.width,
                self.format.height
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("FFmpeg writer already closed"))?;
        if let Err(e) = stdin.write_all(frame.as_raw()) {
            return Err(MediaError::ffmpeg_failed(
                format!("{} encoder stopped accepting frames: {}", self.codec, e),
                None,
                None,
            ));
        }
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(mut self: Box<Self>) -> MediaResult<u64> {
        // Closing stdin signals end of stream.
        drop(self.stdin.take());
        let status = self.child.wait()?;
        let stderr = join_stderr(self.stderr.take());

        if status.success() {
            Ok(self.frames)
        } else {
            Err(MediaError::ffmpeg_failed(
                format!("{} encoder failed", self.codec),
                Some(stderr),
                status.code(),
            ))
        }
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|s| tail(&s, 2000))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_labels() {
        assert_eq!(FfmpegWriterBackend::libx264().label(), "libx264 (.mp4)");
        assert_eq!(FfmpegWriterBackend::mpeg4().extension(), "avi");
        assert_eq!(FfmpegWriterBackend::mjpeg().label(), "mjpeg (.avi)");
    }

    #[test]
    fn test_seek_lands_between_previous_and_start_frame() {
        for fps in [24.0, 25.0, 29.97, 30.0, 60.0] {
            for frame in 1..600u64 {
                let printed: f64 = format!("{:.3}", seek_seconds(frame, fps)).parse().unwrap();
                let previous = (frame - 1) as f64 / fps;
                let start = frame as f64 / fps;
                assert!(
                    printed > previous && printed <= start,
                    "frame {} at {} fps seeks to {}",
                    frame,
                    fps,
                    printed
                );
            }
        }
    }

    #[test]
    fn test_missing_program_does_not_open() {
        let backend = FfmpegWriterBackend::libx264().with_program("vart-no-such-ffmpeg-binary");
        let dir = tempfile::TempDir::new().unwrap();
        let result = backend.open(&dir.path().join("x.mp4"), FrameFormat::new(8, 8, 30.0));
        assert!(matches!(result, Err(MediaError::FfmpegNotFound)));
    }
}
