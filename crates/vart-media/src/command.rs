//! Building and running `ffmpeg` invocations.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Argument list for one `ffmpeg` invocation.
///
/// Options are split around `-i`: demuxer options such as `-f concat` or
/// `-ss` go before the input, codec and muxer options after it. The command
/// always overwrites its output and logs at `error`.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    before_input: Vec<String>,
    after_input: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            before_input: Vec::new(),
            after_input: Vec::new(),
        }
    }

    fn input_flag(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.before_input.push(flag.to_string());
        self.before_input.push(value.into());
        self
    }

    fn output_flag(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.after_input.push(flag.to_string());
        self.after_input.push(value.into());
        self
    }

    /// Append raw output options verbatim.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_input.extend(args.into_iter().map(Into::into));
        self
    }

    /// Start decoding at `seconds` (input-side seek).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_flag("-ss", format!("{:.3}", seconds))
    }

    /// Treat the input as a concat-demuxer manifest with absolute paths.
    pub fn concat_manifest(self) -> Self {
        self.input_flag("-f", "concat").input_flag("-safe", "0")
    }

    /// Raw RGB24 frames of the given geometry arrive on the input.
    pub fn raw_rgb_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_flag("-f", "rawvideo")
            .input_flag("-pix_fmt", "rgb24")
            .input_flag("-s", format!("{}x{}", width, height))
            .input_flag("-r", fps.to_string())
    }

    pub fn raw_rgb_output(self) -> Self {
        self.output_flag("-f", "rawvideo")
            .output_flag("-pix_fmt", "rgb24")
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_flag("-c:v", codec)
    }

    pub fn stream_copy(self) -> Self {
        self.output_flag("-c", "copy")
    }

    pub fn no_audio(self) -> Self {
        self.output_args(["-an"])
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_flag("-crf", crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_flag("-preset", preset)
    }

    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_flag("-pix_fmt", pix_fmt)
    }

    /// Put the MP4 index first so players can start before the download ends.
    pub fn faststart(self) -> Self {
        self.output_flag("-movflags", "+faststart")
    }

    pub fn build_args(&self) -> Vec<String> {
        ["-y", "-hide_banner", "-v", "error"]
            .into_iter()
            .map(String::from)
            .chain(self.before_input.iter().cloned())
            .chain(["-i".to_string(), self.input.to_string_lossy().into_owned()])
            .chain(self.after_input.iter().cloned())
            .chain(std::iter::once(self.output.to_string_lossy().into_owned()))
            .collect()
    }
}

/// Runs an [`FfmpegCommand`] to completion, optionally under a deadline.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    program: String,
    deadline: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            deadline: None,
        }
    }

    /// Use a different executable (name on `PATH` or absolute path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.deadline = Some(Duration::from_secs(secs));
        self
    }

    /// Spawn the command and wait for it.
    ///
    /// A missing executable is `FfmpegNotFound`. A non-zero exit carries the
    /// tail of stderr. Past the deadline the child is killed and the call
    /// returns `Timeout`.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        which::which(&self.program).map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!(program = %self.program, args = %args.join(" "), "Spawning FFmpeg");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        // Drained concurrently; a full pipe would stall the encoder.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let waited = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(
                        program = %self.program,
                        secs = deadline.as_secs(),
                        "FFmpeg exceeded its deadline, killing it"
                    );
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(deadline.as_secs()));
                }
            },
            None => child.wait().await,
        };
        let status = waited?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                format!("{} exited with {}", self.program, status),
                Some(tail(&stderr_text, 2000)),
                status.code(),
            ))
        }
    }
}

/// Last `max` bytes of a diagnostic string, cut on a char boundary.
pub(crate) fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.trim().to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim().to_string()
}

/// Resolve `ffmpeg` on `PATH`.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Resolve `ffprobe` on `PATH`.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
