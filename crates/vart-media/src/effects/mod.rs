//! Per-frame art style effects.
//!
//! Effects implement [`FrameEffect::render`], which produces the
//! full-strength styled frame. Callers never use `render` directly: they go
//! through [`apply_effect`], which owns the intensity blend and the
//! guarantee that one bad frame never aborts a chunk.

pub mod anime;
pub mod cartoon;
pub mod oil_painting;
pub mod ops;
pub mod pencil;
pub mod vintage_film;
pub mod watercolor;

use image::RgbImage;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use vart_models::StyleId;

use crate::error::{MediaError, MediaResult};

pub use anime::Anime;
pub use cartoon::Cartoon;
pub use oil_painting::OilPainting;
pub use pencil::Pencil;
pub use vintage_film::VintageFilm;
pub use watercolor::Watercolor;

/// Longest side at which built-in styles do their work.
pub const WORKING_MAX_DIM: u32 = 720;

/// Result type for effect internals.
pub type EffectResult<T> = Result<T, EffectError>;

/// Failures inside an effect. Never escapes [`apply_effect`].
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("Frame too small: {width}x{height}")]
    FrameTooSmall { width: u32, height: u32 },

    #[error("Effect computation failed: {0}")]
    Computation(String),
}

/// A stateless per-frame transform.
pub trait FrameEffect: Send + Sync {
    /// Style identifier this effect is registered under.
    fn name(&self) -> &str;

    /// Full-strength styled frame with the same dimensions as the input.
    fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage>;
}

/// Apply `effect` to `frame` at `intensity`.
///
/// - intensity is clamped to `[0, 1]`; 0 returns an exact copy of the input
/// - each channel is `round((1 - t) * original + t * styled)`
/// - if `render` fails, panics, or changes the frame size, the input frame
///   is returned unchanged
pub fn apply_effect(effect: &dyn FrameEffect, frame: &RgbImage, intensity: f32) -> RgbImage {
    let t = if intensity.is_nan() {
        0.0
    } else {
        intensity.clamp(0.0, 1.0)
    };
    if t == 0.0 {
        return frame.clone();
    }

    let styled = match catch_unwind(AssertUnwindSafe(|| effect.render(frame))) {
        Ok(Ok(styled)) if styled.dimensions() == frame.dimensions() => styled,
        Ok(Ok(styled)) => {
            warn!(
                effect = effect.name(),
                expected = ?frame.dimensions(),
                got = ?styled.dimensions(),
                "Effect changed frame size, keeping original frame"
            );
            return frame.clone();
        }
        Ok(Err(e)) => {
            warn!(effect = effect.name(), error = %e, "Effect failed, keeping original frame");
            return frame.clone();
        }
        Err(_) => {
            warn!(effect = effect.name(), "Effect panicked, keeping original frame");
            return frame.clone();
        }
    };

    if t == 1.0 {
        return styled;
    }
    blend(frame, &styled, t)
}

/// Per-channel linear blend of two equally sized frames.
pub fn blend(original: &RgbImage, styled: &RgbImage, t: f32) -> RgbImage {
    let raw = original
        .as_raw()
        .iter()
        .zip(styled.as_raw())
        .map(|(&o, &s)| ops::to_u8((1.0 - t) * o as f32 + t * s as f32))
        .collect();
    RgbImage::from_raw(original.width(), original.height(), raw)
        .unwrap_or_else(|| original.clone())
}

/// Registry mapping style identifiers to effects.
///
/// Populated at startup; adding a style means registering another
/// [`FrameEffect`], nothing else changes.
#[derive(Clone, Default)]
pub struct EffectRegistry {
    effects: HashMap<StyleId, Arc<dyn FrameEffect>>,
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("styles", &self.styles())
            .finish()
    }
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the six built-in styles.
    pub fn with_builtin_styles() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Pencil::default()));
        registry.register(Arc::new(Cartoon::default()));
        registry.register(Arc::new(OilPainting::default()));
        registry.register(Arc::new(Watercolor::default()));
        registry.register(Arc::new(Anime::default()));
        registry.register(Arc::new(VintageFilm::default()));
        registry
    }

    /// Register an effect under its own name, replacing any previous one.
    pub fn register(&mut self, effect: Arc<dyn FrameEffect>) {
        self.effects.insert(StyleId::new(effect.name()), effect);
    }

    pub fn get(&self, style: &StyleId) -> Option<Arc<dyn FrameEffect>> {
        self.effects.get(style).cloned()
    }

    /// Look up an effect, failing with `UnknownStyle`.
    pub fn resolve(&self, style: &StyleId) -> MediaResult<Arc<dyn FrameEffect>> {
        self.get(style)
            .ok_or_else(|| MediaError::UnknownStyle(style.to_string()))
    }

    pub fn contains(&self, style: &StyleId) -> bool {
        self.effects.contains_key(style)
    }

    /// Registered style names, sorted.
    pub fn styles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.effects.keys().map(|s| s.to_string()).collect();
        names.sort();
        names
    }
}

/// Built-in styles need a few pixels of context.
pub(crate) fn ensure_min_size(frame: &RgbImage, min: u32) -> EffectResult<()> {
    let (width, height) = frame.dimensions();
    if width < min || height < min {
        return Err(EffectError::FrameTooSmall { width, height });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 5) as u8, ((x * y) % 256) as u8])
        })
    }

    struct Invert;
    impl FrameEffect for Invert {
        fn name(&self) -> &str {
            "invert"
        }
        fn render(&self, frame: &RgbImage) -> EffectResult<RgbImage> {
            let mut out = frame.clone();
            image::imageops::invert(&mut out);
            Ok(out)
        }
    }

    struct Failing;
    impl FrameEffect for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn render(&self, _frame: &RgbImage) -> EffectResult<RgbImage> {
            Err(EffectError::Computation("boom".into()))
        }
    }

    struct Panicking;
    impl FrameEffect for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn render(&self, _frame: &RgbImage) -> EffectResult<RgbImage> {
            panic!("effect bug")
        }
    }

    struct Shrinking;
    impl FrameEffect for Shrinking {
        fn name(&self) -> &str {
            "shrinking"
        }
        fn render(&self, _frame: &RgbImage) -> EffectResult<RgbImage> {
            Ok(RgbImage::new(2, 2))
        }
    }

    #[test]
    fn test_zero_intensity_is_identity() {
        let frame = sample_frame();
        for effect in EffectRegistry::with_builtin_styles().effects.values() {
            assert_eq!(apply_effect(effect.as_ref(), &frame, 0.0), frame);
        }
    }

    #[test]
    fn test_full_intensity_is_render_output() {
        let frame = sample_frame();
        let effect = Invert;
        assert_eq!(
            apply_effect(&effect, &frame, 1.0),
            effect.render(&frame).unwrap()
        );
    }

    #[test]
    fn test_half_intensity_is_average_for_every_builtin() {
        let frame = sample_frame();
        for effect in EffectRegistry::with_builtin_styles().effects.values() {
            let zero = apply_effect(effect.as_ref(), &frame, 0.0);
            let full = apply_effect(effect.as_ref(), &frame, 1.0);
            let half = apply_effect(effect.as_ref(), &frame, 0.5);
            for ((h, z), f) in half.as_raw().iter().zip(zero.as_raw()).zip(full.as_raw()) {
                let expected = ops::to_u8(0.5 * *z as f32 + 0.5 * *f as f32);
                assert_eq!(*h, expected, "style {}", effect.name());
            }
        }
    }

    #[test]
    fn test_failures_return_input_unchanged() {
        let frame = sample_frame();
        assert_eq!(apply_effect(&Failing, &frame, 0.8), frame);
        assert_eq!(apply_effect(&Panicking, &frame, 0.8), frame);
        assert_eq!(apply_effect(&Shrinking, &frame, 0.8), frame);
    }

    #[test]
    fn test_intensity_is_clamped() {
        let frame = sample_frame();
        assert_eq!(apply_effect(&Invert, &frame, 7.0), apply_effect(&Invert, &frame, 1.0));
        assert_eq!(apply_effect(&Invert, &frame, -1.0), frame);
        assert_eq!(apply_effect(&Invert, &frame, f32::NAN), frame);
    }

    #[test]
    fn test_builtins_preserve_dimensions_and_degrade_on_tiny_frames() {
        let frame = sample_frame();
        let tiny = RgbImage::from_pixel(2, 2, image::Rgb([9, 9, 9]));
        for effect in EffectRegistry::with_builtin_styles().effects.values() {
            assert_eq!(effect.render(&frame).unwrap().dimensions(), frame.dimensions());
            assert_eq!(apply_effect(effect.as_ref(), &tiny, 1.0), tiny);
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = EffectRegistry::with_builtin_styles();
        assert_eq!(
            registry.styles(),
            vec!["anime", "cartoon", "oil_painting", "pencil", "vintage_film", "watercolor"]
        );
        tokio_test::assert_ok!(registry.resolve(&StyleId::new("Oil Painting")));
        assert!(matches!(
            registry.resolve(&StyleId::new("neon")),
            Err(MediaError::UnknownStyle(_))
        ));

        registry.register(Arc::new(Invert));
        assert!(registry.contains(&StyleId::new("invert")));
    }
}
