//! Cartoon: flat colour regions with inked outlines.

use image::RgbImage;
use vart_models::StyleId;

use super::ops::{apply_ink, at_working_size, bilateral, quantize_colors, Plane};
use super::{ensure_min_size, EffectResult, FrameEffect, WORKING_MAX_DIM};

#[derive(Debug, Clone)]
pub struct Cartoon {
    /// Palette size after quantization.
    pub colors: usize,
    /// Edge-preserving smoothing passes before quantization.
    pub smoothing_passes: usize,
    /// Neighbourhood radius of the outline threshold.
    pub outline_radius: usize,
}

impl Default for Cartoon {
    fn default() -> Self {
        Self {
            colors: 8,
            smoothing_passes: 2,
            outline_radius: 4,
        }
    }
}

impl FrameEffect for Cartoon {
    fn name(&self) -> &str {
        StyleId::CARTOON
    }

    fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage> {
        ensure_min_size(frame, 8)?;
        Ok(at_working_size(frame, WORKING_MAX_DIM, |f| {
            let mut smooth = f.clone();
            for _ in 0..self.smoothing_passes {
                smooth = bilateral(&smooth, 2, 40.0, 3.0);
            }
            let mut flat = quantize_colors(&smooth, self.colors, 6);

            let gray = Plane::luma(f).box_blur(1);
            let outline = gray.adaptive_threshold(self.outline_radius, 2.0);
            apply_ink(&mut flat, &outline);
            flat
        }))
    }
}
