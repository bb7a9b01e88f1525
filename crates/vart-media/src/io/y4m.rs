//! YUV4MPEG2 reader and writer.
//!
//! Uncompressed and implemented without external tools, so a pipeline always
//! has one writer that opens. Frames are written as full-range BT.601 4:4:4;
//! the reader also accepts 4:2:0 and mono streams produced by other tools.

use image::RgbImage;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{FrameFormat, FrameReader, FrameWriter, ReaderBackend, VideoInfo, WriterBackend};
use crate::error::{MediaError, MediaResult};

const SIGNATURE: &str = "YUV4MPEG2";
const FRAME_MARKER: &[u8] = b"FRAME";
const MAX_HEADER_LEN: usize = 4096;
/// Largest frame accepted from a stream header (8K UHD).
const MAX_FRAME_PIXELS: u64 = 7680 * 4320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chroma {
    C444,
    C420,
    Mono,
}

impl Chroma {
    fn parse(tag: &str) -> MediaResult<Self> {
        match tag {
            "444" => Ok(Chroma::C444),
            "420" | "420jpeg" | "420paldv" | "420mpeg2" => Ok(Chroma::C420),
            "mono" => Ok(Chroma::Mono),
            other => Err(MediaError::UnsupportedFormat(format!(
                "YUV4MPEG2 colourspace C{other}"
            ))),
        }
    }

    fn frame_len(&self, width: usize, height: usize) -> usize {
        let luma = width * height;
        match self {
            Chroma::C444 => luma * 3,
            Chroma::C420 => luma + 2 * (width.div_ceil(2) * height.div_ceil(2)),
            Chroma::Mono => luma,
        }
    }
}

/// Reader backend for `.y4m` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Y4mReaderBackend;

impl ReaderBackend for Y4mReaderBackend {
    fn name(&self) -> &str {
        "yuv4mpeg2"
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("y4m"))
    }

    fn open(&self, path: &Path, start_frame: u64) -> MediaResult<Box<dyn FrameReader>> {
        Ok(Box::new(Y4mReader::open(path, start_frame)?))
    }
}

/// Writer backend producing `.y4m` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Y4mWriterBackend;

impl WriterBackend for Y4mWriterBackend {
    fn label(&self) -> String {
        "yuv4mpeg2 (.y4m)".to_string()
    }

    fn extension(&self) -> &str {
        "y4m"
    }

    fn open(&self, path: &Path, format: FrameFormat) -> MediaResult<Box<dyn FrameWriter>> {
        Ok(Box::new(Y4mWriter::create(path, format)?))
    }
}

/// Sequential YUV4MPEG2 reader.
pub struct Y4mReader {
    input: BufReader<File>,
    info: VideoInfo,
    chroma: Chroma,
    frame_len: usize,
    buf: Vec<u8>,
}

impl Y4mReader {
    pub fn open(path: &Path, start_frame: u64) -> MediaResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut input = BufReader::new(file);

        let header = read_line(&mut input)?
            .ok_or_else(|| MediaError::InvalidVideo("empty YUV4MPEG2 file".to_string()))?;
        let header_len = header.len() as u64 + 1;
        let (width, height, fps, chroma) = parse_stream_header(&header)?;

        let frame_len = chroma.frame_len(width as usize, height as usize);
        let stride = (FRAME_MARKER.len() + 1 + frame_len) as u64;
        let frame_count = file_len.saturating_sub(header_len) / stride;

        let mut reader = Self {
            input,
            info: VideoInfo {
                width,
                height,
                fps,
                frame_count,
            },
            chroma,
            frame_len,
            buf: vec![0; frame_len],
        };
        reader.seek_to(start_frame, header_len, stride)?;
        Ok(reader)
    }

    /// Position at `frame`. Uses the fixed stride when frame headers carry no
    /// parameters and falls back to skipping frame by frame otherwise.
    fn seek_to(&mut self, frame: u64, header_len: u64, stride: u64) -> MediaResult<()> {
        if frame == 0 {
            return Ok(());
        }

        let offset = header_len + frame * stride;
        self.input.seek(SeekFrom::Start(offset))?;
        let mut marker = [0u8; 5];
        match self.input.read_exact(&mut marker) {
            Ok(()) if marker == FRAME_MARKER => {
                self.input.seek(SeekFrom::Start(offset))?;
                return Ok(());
            }
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {}
            Err(e) => return Err(e.into()),
        }

        self.input.seek(SeekFrom::Start(header_len))?;
        for _ in 0..frame {
            if !self.read_raw()? {
                break;
            }
        }
        Ok(())
    }

    /// Read the next frame's planes into `buf`. Returns false at end of stream.
    fn read_raw(&mut self) -> MediaResult<bool> {
        let Some(line) = read_line(&mut self.input)? else {
            return Ok(false);
        };
        if !line.as_bytes().starts_with(FRAME_MARKER) {
            return Err(MediaError::InvalidVideo(format!(
                "expected FRAME header, found {:?}",
                line.chars().take(16).collect::<String>()
            )));
        }
        match self.input.read_exact(&mut self.buf) {
            Ok(()) => Ok(true),
            // A truncated trailing frame ends the stream.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl FrameReader for Y4mReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        if !self.read_raw()? {
            return Ok(None);
        }
        let (w, h) = (self.info.width, self.info.height);
        Ok(Some(planes_to_rgb(&self.buf, w, h, self.chroma)))
    }
}

/// YUV4MPEG2 writer emitting 4:4:4 frames.
pub struct Y4mWriter {
    output: BufWriter<File>,
    path: PathBuf,
    format: FrameFormat,
    frames: u64,
    planes: Vec<u8>,
}

impl Y4mWriter {
    pub fn create(path: &Path, format: FrameFormat) -> MediaResult<Self> {
        if format.width == 0 || format.height == 0 {
            return Err(MediaError::UnsupportedFormat(format!(
                "cannot encode {}x{} frames",
                format.width, format.height
            )));
        }

        let mut output = BufWriter::new(File::create(path)?);
        let (num, den) = fps_ratio(format.fps);
        writeln!(
            output,
            "{SIGNATURE} W{} H{} F{num}:{den} Ip A1:1 C444",
            format.width, format.height
        )?;

        Ok(Self {
            output,
            path: path.to_path_buf(),
            format,
            frames: 0,
            planes: vec![0; format.rgb_frame_len()],
        })
    }
}

impl FrameWriter for Y4mWriter {
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

        rgb_to_planes(frame, &mut self.planes);
        self.output.write_all(FRAME_MARKER)?;
        self.output.write_all(b"\n")?;
        self.output.write_all(&self.planes)?;
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(mut self: Box<Self>) -> MediaResult<u64> {
        self.output.flush()?;
        self.output.get_ref().sync_all()?;
        Ok(self.frames)
    }
}

fn read_line(input: &mut impl BufRead) -> MediaResult<Option<String>> {
    let mut line = Vec::new();
    let read = input
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        // Header cut off by EOF or longer than any sane header.
        return if line.len() >= MAX_HEADER_LEN {
            Err(MediaError::InvalidVideo("YUV4MPEG2 header too long".to_string()))
        } else {
            Ok(None)
        };
    }
    line.pop();
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

fn parse_stream_header(header: &str) -> MediaResult<(u32, u32, f64, Chroma)> {
    let mut tokens = header.split(' ');
    if tokens.next() != Some(SIGNATURE) {
        return Err(MediaError::InvalidVideo("missing YUV4MPEG2 signature".to_string()));
    }

    let mut width = None;
    let mut height = None;
    let mut fps = 30.0;
    let mut chroma = Chroma::C420;

    for token in tokens.filter(|t| !t.is_empty()) {
        let mut chars = token.chars();
        let Some(tag) = chars.next() else {
            continue;
        };
        let value = chars.as_str();
        match tag {
            'W' => width = value.parse::<u32>().ok(),
            'H' => height = value.parse::<u32>().ok(),
            'F' => {
                if let Some((n, d)) = value.split_once(':') {
                    let n: f64 = n.parse().unwrap_or(0.0);
                    let d: f64 = d.parse().unwrap_or(0.0);
                    if n > 0.0 && d > 0.0 {
                        fps = n / d;
                    }
                }
            }
            'C' => chroma = Chroma::parse(value)?,
            _ => {}
        }
    }

    match (width, height) {
        (Some(w), Some(h)) if w as u64 * h as u64 > MAX_FRAME_PIXELS => Err(
            MediaError::InvalidVideo(format!("YUV4MPEG2 frame size {}x{} is too large", w, h)),
        ),
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h, fps, chroma)),
        _ => Err(MediaError::InvalidVideo(
            "YUV4MPEG2 header lacks frame size".to_string(),
        )),
    }
}

/// Rational frame rate for the stream header.
fn fps_ratio(fps: f64) -> (u64, u64) {
    if !fps.is_finite() || fps <= 0.0 {
        return (30, 1);
    }
    if (fps - fps.round()).abs() < 1e-6 {
        return (fps.round() as u64, 1);
    }
    let ntsc = fps * 1001.0;
    if (ntsc - ntsc.round()).abs() < 1e-3 {
        return (ntsc.round() as u64, 1001);
    }
    ((fps * 1000.0).round() as u64, 1000)
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Full-range BT.601 RGB to planar Y, Cb, Cr.
fn rgb_to_planes(frame: &RgbImage, planes: &mut [u8]) {
    let n = (frame.width() * frame.height()) as usize;
    let (y_plane, rest) = planes.split_at_mut(n);
    let (u_plane, v_plane) = rest.split_at_mut(n);

    for (i, px) in frame.pixels().enumerate() {
        let [r, g, b] = px.0.map(f32::from);
        y_plane[i] = clamp_u8(0.299 * r + 0.587 * g + 0.114 * b);
        u_plane[i] = clamp_u8(128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b);
        v_plane[i] = clamp_u8(128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b);
    }
}

fn planes_to_rgb(planes: &[u8], width: u32, height: u32, chroma: Chroma) -> RgbImage {
    let (w, h) = (width as usize, height as usize);
    let n = w * h;
    let cw = w.div_ceil(2);

    RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = f32::from(planes[y * w + x]);
        let (cb, cr) = match chroma {
            Chroma::C444 => (planes[n + y * w + x], planes[2 * n + y * w + x]),
            Chroma::C420 => {
                let chroma_len = cw * h.div_ceil(2);
                let ci = (y / 2) * cw + x / 2;
                (planes[n + ci], planes[n + chroma_len + ci])
            }
            Chroma::Mono => (128, 128),
        };
        let cb = f32::from(cb) - 128.0;
        let cr = f32::from(cr) - 128.0;
        image::Rgb([
            clamp_u8(luma + 1.402 * cr),
            clamp_u8(luma - 0.344_136 * cb - 0.714_136 * cr),
            clamp_u8(luma + 1.772 * cb),
        ])
    })
}
