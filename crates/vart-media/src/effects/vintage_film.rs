//! Vintage film: sepia toning, vignette and film grain.

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vart_models::StyleId;

use super::ops::to_u8;
use super::{ensure_min_size, EffectResult, FrameEffect};

const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

#[derive(Debug, Clone)]
pub struct VintageFilm {
    /// Peak-to-peak grain amplitude
    pub grain: u8,
    /// Brightness lost at the corners
    pub vignette: f32,
}

impl Default for VintageFilm {
    fn default() -> Self {
        Self {
            grain: 50,
            vignette: 0.3,
        }
    }
}

impl FrameEffect for VintageFilm {
    fn name(&self) -> &str {
        StyleId::VINTAGE_FILM
    }

    fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage> {
        ensure_min_size(frame, 8)?;

        let (w, h) = frame.dimensions();
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
        let max_r = (cx * cx + cy * cy).sqrt();
        // Grain is seeded from the frame so re-rendering a frame is repeatable.
        let mut rng = StdRng::seed_from_u64(frame_seed(frame));
        let half = self.grain as f32 / 2.0;

        let mut out = frame.clone();
        for (x, y, px) in out.enumerate_pixels_mut() {
            let [r, g, b] = px.0.map(f32::from);
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let falloff =
                (1.0 - (dx * dx + dy * dy).sqrt() / max_r * self.vignette).clamp(0.4, 1.0);
            let noise = if self.grain > 0 {
                rng.random_range(0..self.grain) as f32 - half
            } else {
                0.0
            };

            let mut toned = [0u8; 3];
            for (c, row) in SEPIA.iter().enumerate() {
                let v = row[0] * r + row[1] * g + row[2] * b;
                toned[c] = to_u8(v * falloff + noise);
            }
            px.0 = toned;
        }
        Ok(out)
    }
}

/// FNV-1a over a sparse sample of the frame.
fn frame_seed(frame: &RgbImage) -> u64 {
    let raw = frame.as_raw();
    let step = (raw.len() / 1024).max(1);
    raw.iter()
        .step_by(step)
        .fold(0xcbf2_9ce4_8422_2325u64, |hash, &b| {
            (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3)
        })
}
