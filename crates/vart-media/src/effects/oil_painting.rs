//! Oil painting.

use image::RgbImage;
use vart_models::StyleId;

use super::ops::{at_working_size, oil_paint};
use super::{ensure_min_size, EffectResult, FrameEffect, WORKING_MAX_DIM};

/// Intensity-histogram brush strokes.
#[derive(Debug, Clone)]
pub struct OilPainting {
    /// Brush radius in pixels
    pub radius: u32,
    /// Number of intensity buckets
    pub levels: usize,
}

impl Default for OilPainting {
    fn default() -> Self {
        Self {
            radius: 3,
            levels: 20,
        }
    }
}

impl FrameEffect for OilPainting {
    fn name(&self) -> &str {
        StyleId::OIL_PAINTING
    }

    fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage> {
        ensure_min_size(frame, 8)?;
        Ok(at_working_size(frame, WORKING_MAX_DIM, |f| {
            oil_paint(f, self.radius, self.levels)
        }))
    }
}
