//! Crop, trim and resize parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A crop rectangle in source pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CropRect {
    /// X coordinate of the top-left corner
    pub x: u32,
    /// Y coordinate of the top-left corner
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl CropRect {
    /// Create a new crop rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clamp the rectangle so it lies within a `src_width` x `src_height` frame.
    ///
    /// The origin is pulled back so that as much of the requested size as
    /// possible fits, then the size is cut to the remaining frame area. The
    /// result always covers at least one pixel of a non-empty frame.
    pub fn clamp_to(&self, src_width: u32, src_height: u32) -> CropRect {
        let (x, width) = clamp_axis(self.x, self.width, src_width);
        let (y, height) = clamp_axis(self.y, self.height, src_height);
        CropRect { x, y, width, height }
    }

    /// Whether the rectangle lies fully inside the given frame.
    pub fn fits_within(&self, src_width: u32, src_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= src_width as u64
            && self.y as u64 + self.height as u64 <= src_height as u64
    }
}

fn clamp_axis(origin: u32, length: u32, bound: u32) -> (u32, u32) {
    if bound == 0 {
        return (0, 0);
    }
    let length = length.clamp(1, bound);
    let origin = origin.min(bound - length);
    let length = length.min(bound - origin);
    (origin, length)
}

/// Output size requested for every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResizeTarget {
    pub width: u32,
    pub height: u32,
}

impl ResizeTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero dimension cannot be encoded.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Half-open frame interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct FrameSpan {
    pub start: u64,
    pub end: u64,
}

impl FrameSpan {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of frames in the span.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trim window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrimWindow {
    /// Start time in seconds
    #[serde(default)]
    pub start_time: f64,
    /// End time in seconds (end of video when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

impl TrimWindow {
    pub fn new(start_time: f64, end_time: Option<f64>) -> Self {
        Self { start_time, end_time }
    }

    /// Resolve the window to a frame span clamped to `[0, total_frames)`.
    ///
    /// Returns `None` when the clamped span is empty.
    pub fn frame_span(&self, fps: f64, total_frames: u64) -> Option<FrameSpan> {
        let to_frame = |secs: f64| -> u64 {
            if !secs.is_finite() || secs <= 0.0 {
                0
            } else {
                (secs * fps).floor() as u64
            }
        };

        let start = to_frame(self.start_time).min(total_frames);
        let end = match self.end_time {
            Some(end) if end.is_finite() => to_frame(end).min(total_frames),
            _ => total_frames,
        };

        let span = FrameSpan::new(start, end.max(start));
        if span.is_empty() {
            None
        } else {
            Some(span)
        }
    }
}
