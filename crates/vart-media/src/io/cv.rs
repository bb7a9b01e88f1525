//! OpenCV `VideoCapture` / `VideoWriter` backends.

use image::RgbImage;
use opencv::core::{Mat, Scalar, Size, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoWriter};
use std::path::{Path, PathBuf};

use super::{FrameFormat, FrameReader, FrameWriter, ReaderBackend, VideoInfo, WriterBackend};
use crate::error::{MediaError, MediaResult};

fn path_str(path: &Path) -> MediaResult<&str> {
    path.to_str()
        .ok_or_else(|| MediaError::UnsupportedFormat(format!("non UTF-8 path {}", path.display())))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvReaderBackend;

impl ReaderBackend for OpenCvReaderBackend {
    fn name(&self) -> &str {
        "opencv"
    }

    fn supports(&self, _path: &Path) -> bool {
        true
    }

    fn open(&self, path: &Path, start_frame: u64) -> MediaResult<Box<dyn FrameReader>> {
        let mut cap = VideoCapture::from_file(path_str(path)?, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(MediaError::InvalidVideo(format!(
                "OpenCV cannot open {}",
                path.display()
            )));
        }

        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let info = VideoInfo {
            width: cap.get(videoio::CAP_PROP_FRAME_WIDTH)?.max(0.0) as u32,
            height: cap.get(videoio::CAP_PROP_FRAME_HEIGHT)?.max(0.0) as u32,
            fps: if fps > 0.0 { fps } else { 30.0 },
            frame_count: cap.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64,
        };
        if start_frame > 0 {
            cap.set(videoio::CAP_PROP_POS_FRAMES, start_frame as f64)?;
        }

        Ok(Box::new(OpenCvReader {
            cap,
            info,
            bgr: Mat::default(),
            rgb: Mat::default(),
        }))
    }
}

struct OpenCvReader {
    cap: VideoCapture,
    info: VideoInfo,
    bgr: Mat,
    rgb: Mat,
}

// VideoCapture is only used from the thread that currently owns the reader.
unsafe impl Send for OpenCvReader {}

impl FrameReader for OpenCvReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        if !self.cap.read(&mut self.bgr)? || self.bgr.empty() {
            return Ok(None);
        }
        imgproc::cvt_color_def(&self.bgr, &mut self.rgb, imgproc::COLOR_BGR2RGB)?;
        let (w, h) = (self.rgb.cols() as u32, self.rgb.rows() as u32);
        Ok(RgbImage::from_raw(w, h, self.rgb.data_bytes()?.to_vec()))
    }
}

/// One fourcc/container combination.
#[derive(Debug, Clone)]
pub struct OpenCvWriterBackend {
    fourcc: [char; 4],
    extension: &'static str,
}

impl OpenCvWriterBackend {
    pub fn new(fourcc: [char; 4], extension: &'static str) -> Self {
        Self { fourcc, extension }
    }

    /// `avc1`/mp4, `mp4v`/mp4, `XVID`/avi, `MJPG`/avi.
    pub fn default_list() -> Vec<Self> {
        vec![
            Self::new(['a', 'v', 'c', '1'], "mp4"),
            Self::new(['m', 'p', '4', 'v'], "mp4"),
            Self::new(['X', 'V', 'I', 'D'], "avi"),
            Self::new(['M', 'J', 'P', 'G'], "avi"),
        ]
    }
}

impl WriterBackend for OpenCvWriterBackend {
    fn label(&self) -> String {
        let code: String = self.fourcc.iter().collect();
        format!("opencv {} (.{})", code, self.extension)
    }

    fn extension(&self) -> &str {
        self.extension
    }

    fn open(&self, path: &Path, format: FrameFormat) -> MediaResult<Box<dyn FrameWriter>> {
        let [a, b, c, d] = self.fourcc;
        let fourcc = VideoWriter::fourcc(a, b, c, d)?;
        let writer = VideoWriter::new(
            path_str(path)?,
            fourcc,
            format.fps,
            Size::new(format.width as i32, format.height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(MediaError::UnsupportedFormat(format!(
                "OpenCV writer {} did not open",
                self.label()
            )));
        }

        Ok(Box::new(OpenCvWriter {
            writer,
            path: path.to_path_buf(),
            format,
            frames: 0,
        }))
    }
}

struct OpenCvWriter {
    writer: VideoWriter,
    path: PathBuf,
    format: FrameFormat,
    frames: u64,
}

// VideoWriter is only used from the thread that currently owns the writer.
unsafe impl Send for OpenCvWriter {}

impl FrameWriter for OpenCvWriter {
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

        let mut rgb = Mat::new_rows_cols_with_default(
            frame.height() as i32,
            frame.width() as i32,
            CV_8UC3,
            Scalar::all(0.0),
        )?;
        rgb.data_bytes_mut()?.copy_from_slice(frame.as_raw());
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
        self.writer.write(&bgr)?;
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(mut self: Box<Self>) -> MediaResult<u64> {
        self.writer.release()?;
        Ok(self.frames)
    }
}
