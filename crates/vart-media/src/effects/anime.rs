//! Anime: strong posterisation, bold outlines and lifted contrast.

use image::RgbImage;
use vart_models::StyleId;

use super::ops::{adjust_contrast, apply_ink, at_working_size, bilateral, quantize_colors, Plane};
use super::{ensure_min_size, EffectResult, FrameEffect, WORKING_MAX_DIM};

#[derive(Debug, Clone)]
pub struct Anime {
    pub colors: usize,
    pub contrast: f32,
    pub brightness: f32,
}

impl Default for Anime {
    fn default() -> Self {
        Self {
            colors: 6,
            contrast: 1.2,
            brightness: 10.0,
        }
    }
}

impl FrameEffect for Anime {
    fn name(&self) -> &str {
        StyleId::ANIME
    }

    fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage> {
        ensure_min_size(frame, 8)?;
        Ok(at_working_size(frame, WORKING_MAX_DIM, |f| {
            let smooth = bilateral(f, 3, 50.0, 3.0);
            let mut flat = quantize_colors(&smooth, self.colors, 6);
            adjust_contrast(&mut flat, self.contrast, self.brightness);

            let outline = Plane::luma(&smooth).adaptive_threshold(3, 4.0);
            apply_ink(&mut flat, &outline);
            flat
        }))
    }
}
