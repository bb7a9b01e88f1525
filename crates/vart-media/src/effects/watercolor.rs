//! Watercolor.

use image::RgbImage;
use vart_models::StyleId;

use super::ops::{at_working_size, bilateral, to_u8, Plane};
use super::{ensure_min_size, EffectResult, FrameEffect, WORKING_MAX_DIM};

/// Heavy edge-preserving smoothing with soft, washed-out outlines.
#[derive(Debug, Clone)]
pub struct Watercolor {
    /// Share of the plain smoothed image in the final mix.
    pub wash: f32,
    /// Darkening applied along edges in the outlined layer.
    pub edge_darkening: f32,
}

impl Default for Watercolor {
    fn default() -> Self {
        Self {
            wash: 0.7,
            edge_darkening: 0.6,
        }
    }
}

impl FrameEffect for Watercolor {
    fn name(&self) -> &str {
        StyleId::WATERCOLOR
    }

    fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage> {
        ensure_min_size(frame, 8)?;
        Ok(at_working_size(frame, WORKING_MAX_DIM, |f| {
            let smooth = bilateral(&bilateral(f, 3, 60.0, 4.0), 3, 60.0, 4.0);
            let edges = Plane::luma(&smooth).soft_blur(1).edge_strength();

            let mut out = smooth.clone();
            for (px, &e) in out.pixels_mut().zip(&edges.data) {
                let outlined = 1.0 - self.edge_darkening * e;
                for c in px.0.iter_mut() {
                    let v = *c as f32;
                    *c = to_u8(self.wash * v + (1.0 - self.wash) * v * outlined);
                }
            }
            out
        }))
    }
}
