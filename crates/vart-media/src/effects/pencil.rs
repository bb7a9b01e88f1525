//! Pencil sketch.

use image::RgbImage;
use vart_models::StyleId;

use super::ops::{at_working_size, Plane};
use super::{ensure_min_size, EffectResult, FrameEffect, WORKING_MAX_DIM};

/// Grayscale colour-dodge sketch with darkened outlines.
#[derive(Debug, Clone)]
pub struct Pencil {
    /// Blur radius of the inverted image; larger gives softer shading.
    pub blur_radius: usize,
    /// Neighbourhood radius of the outline threshold.
    pub outline_radius: usize,
    /// How dark outlines are drawn (0 = invisible, 1 = black).
    pub outline_weight: f32,
}

impl Default for Pencil {
    fn default() -> Self {
        Self {
            blur_radius: 7,
            outline_radius: 4,
            outline_weight: 0.5,
        }
    }
}

impl Pencil {
    fn sketch(&self, frame: &RgbImage) -> RgbImage {
        let gray = Plane::luma(frame);
        let blurred_inverse = gray.map(|v| 255.0 - v).soft_blur(self.blur_radius);

        // Colour dodge: gray / (1 - blurred_inverse)
        let mut sketch = gray.clone();
        for (s, &b) in sketch.data.iter_mut().zip(&blurred_inverse.data) {
            let denom = (255.0 - b).max(1.0);
            *s = (*s * 256.0 / denom).min(255.0);
        }

        let outline = gray.adaptive_threshold(self.outline_radius, 2.0);
        for (s, keep) in sketch.data.iter_mut().zip(outline) {
            if !keep {
                *s *= 1.0 - self.outline_weight;
            }
        }

        sketch.to_rgb()
    }
}

impl FrameEffect for Pencil {
    fn name(&self) -> &str {
        StyleId::PENCIL
    }

    fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage> {
        ensure_min_size(frame, 8)?;
        Ok(at_working_size(frame, WORKING_MAX_DIM, |f| self.sketch(f)))
    }
}
