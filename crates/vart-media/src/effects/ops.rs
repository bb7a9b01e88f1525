//! Image-processing primitives shared by the built-in styles.
//!
//! Everything works on packed `RgbImage` buffers or single-channel `Plane`s
//! of `f32` and is deterministic for a given input.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Single-channel floating point image.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize, fill: f32) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width * height],
        }
    }

    /// BT.601 luma of an RGB frame.
    pub fn luma(frame: &RgbImage) -> Self {
        let data = frame
            .as_raw()
            .chunks_exact(3)
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .collect();
        Self {
            width: frame.width() as usize,
            height: frame.height() as usize,
            data,
        }
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Mean over a `(2r+1)²` window, with the window cut at the borders.
    pub fn box_blur(&self, radius: usize) -> Self {
        if radius == 0 || self.data.is_empty() {
            return self.clone();
        }
        let sums = IntegralImage::new(self);
        let mut out = Plane::new(self.width, self.height, 0.0);
        for y in 0..self.height {
            let y0 = y.saturating_sub(radius);
            let y1 = (y + radius + 1).min(self.height);
            for x in 0..self.width {
                let x0 = x.saturating_sub(radius);
                let x1 = (x + radius + 1).min(self.width);
                out.data[y * self.width + x] = sums.mean(x0, y0, x1, y1);
            }
        }
        out
    }

    /// Gaussian approximation from three box passes.
    pub fn soft_blur(&self, radius: usize) -> Self {
        self.box_blur(radius).box_blur(radius).box_blur(radius)
    }

    /// Local-mean threshold: true where the pixel is brighter than the
    /// neighbourhood mean minus `offset`.
    pub fn adaptive_threshold(&self, radius: usize, offset: f32) -> Vec<bool> {
        let mean = self.box_blur(radius);
        self.data
            .iter()
            .zip(&mean.data)
            .map(|(&v, &m)| v > m - offset)
            .collect()
    }

    /// Sobel gradient magnitude normalised to `[0, 1]`.
    pub fn edge_strength(&self) -> Self {
        let (w, h) = (self.width, self.height);
        let mut out = Plane::new(w, h, 0.0);
        if w < 3 || h < 3 {
            return out;
        }
        let at = |x: usize, y: usize| self.data[y * w + x];
        let mut max = 0.0f32;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let gx = at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1)
                    - at(x - 1, y - 1)
                    - 2.0 * at(x - 1, y)
                    - at(x - 1, y + 1);
                let gy = at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1)
                    - at(x - 1, y - 1)
                    - 2.0 * at(x, y - 1)
                    - at(x + 1, y - 1);
                let mag = (gx * gx + gy * gy).sqrt();
                max = max.max(mag);
                out.data[y * w + x] = mag;
            }
        }
        if max > 0.0 {
            out.data.iter_mut().for_each(|v| *v /= max);
        }
        out
    }

    /// Replicate into all three channels.
    pub fn to_rgb(&self) -> RgbImage {
        let raw = self
            .data
            .iter()
            .flat_map(|&v| {
                let v = to_u8(v);
                [v, v, v]
            })
            .collect();
        RgbImage::from_raw(self.width as u32, self.height as u32, raw)
            .unwrap_or_else(|| RgbImage::new(self.width as u32, self.height as u32))
    }
}

/// Summed-area table for O(1) window means.
struct IntegralImage {
    stride: usize,
    sums: Vec<f64>,
}

impl IntegralImage {
    fn new(plane: &Plane) -> Self {
        let stride = plane.width + 1;
        let mut sums = vec![0.0f64; stride * (plane.height + 1)];
        for y in 0..plane.height {
            let mut row = 0.0f64;
            for x in 0..plane.width {
                row += plane.data[y * plane.width + x] as f64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    fn mean(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f32 {
        let s = &self.sums;
        let total = s[y1 * self.stride + x1] - s[y0 * self.stride + x1] - s[y1 * self.stride + x0]
            + s[y0 * self.stride + x0];
        let area = ((x1 - x0) * (y1 - y0)) as f64;
        (total / area) as f32
    }
}

pub fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Run `render` on a copy no larger than `max_dim` on its longest side and
/// scale the result back to the input size.
pub fn at_working_size(
    frame: &RgbImage,
    max_dim: u32,
    render: impl FnOnce(&RgbImage) -> RgbImage,
) -> RgbImage {
    let (w, h) = frame.dimensions();
    let longest = w.max(h);
    if longest <= max_dim {
        return render(frame);
    }

    let scale = max_dim as f64 / longest as f64;
    let sw = ((w as f64 * scale).round() as u32).max(1);
    let sh = ((h as f64 * scale).round() as u32).max(1);
    let small = imageops::resize(frame, sw, sh, FilterType::Triangle);
    let rendered = render(&small);
    imageops::resize(&rendered, w, h, FilterType::Triangle)
}

/// Edge-preserving smoothing.
///
/// Neighbours are weighted by spatial distance and by the summed absolute
/// colour difference to the centre pixel.
pub fn bilateral(frame: &RgbImage, radius: u32, sigma_color: f32, sigma_space: f32) -> RgbImage {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let r = radius as i64;
    let src = frame.as_raw();

    let mut spatial = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
    for dy in -r..=r {
        for dx in -r..=r {
            let d2 = (dx * dx + dy * dy) as f32;
            spatial.push((dx, dy, (-d2 / (2.0 * sigma_space * sigma_space)).exp()));
        }
    }
    // Colour distance is at most 3 * 255.
    let colour: Vec<f32> = (0..=765)
        .map(|d| {
            let d = d as f32 / 3.0;
            (-(d * d) / (2.0 * sigma_color * sigma_color)).exp()
        })
        .collect();

    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let ci = ((y * w + x) * 3) as usize;
            let centre = [src[ci] as i32, src[ci + 1] as i32, src[ci + 2] as i32];
            let mut acc = [0.0f32; 3];
            let mut norm = 0.0f32;
            for &(dx, dy, ws) in &spatial {
                let nx = (x + dx).clamp(0, w - 1);
                let ny = (y + dy).clamp(0, h - 1);
                let ni = ((ny * w + nx) * 3) as usize;
                let diff = (src[ni] as i32 - centre[0]).abs()
                    + (src[ni + 1] as i32 - centre[1]).abs()
                    + (src[ni + 2] as i32 - centre[2]).abs();
                let weight = ws * colour[diff as usize];
                acc[0] += weight * src[ni] as f32;
                acc[1] += weight * src[ni + 1] as f32;
                acc[2] += weight * src[ni + 2] as f32;
                norm += weight;
            }
            for c in 0..3 {
                out[ci + c] = to_u8(acc[c] / norm);
            }
        }
    }

    RgbImage::from_raw(frame.width(), frame.height(), out).unwrap_or_else(|| frame.clone())
}

/// Reduce the palette to `k` colours with a few rounds of k-means.
///
/// Centres are seeded from luma quantiles of a pixel sample so the result is
/// deterministic.
pub fn quantize_colors(frame: &RgbImage, k: usize, iterations: usize) -> RgbImage {
    let pixels: Vec<[f32; 3]> = frame
        .as_raw()
        .chunks_exact(3)
        .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
        .collect();
    if pixels.is_empty() || k == 0 {
        return frame.clone();
    }

    let step = (pixels.len() / 4096).max(1);
    let mut sample: Vec<[f32; 3]> = pixels.iter().step_by(step).copied().collect();
    sample.sort_by(|a, b| luma3(a).total_cmp(&luma3(b)));

    let k = k.min(sample.len());
    let mut centres: Vec<[f32; 3]> = (0..k)
        .map(|i| sample[(i * 2 + 1) * sample.len() / (2 * k)])
        .collect();

    for _ in 0..iterations {
        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for p in &sample {
            let c = nearest(&centres, p);
            for ch in 0..3 {
                sums[c][ch] += p[ch] as f64;
            }
            counts[c] += 1;
        }
        for (i, centre) in centres.iter_mut().enumerate() {
            if counts[i] > 0 {
                for ch in 0..3 {
                    centre[ch] = (sums[i][ch] / counts[i] as f64) as f32;
                }
            }
        }
    }

    let raw = pixels
        .iter()
        .flat_map(|p| {
            let c = centres[nearest(&centres, p)];
            [to_u8(c[0]), to_u8(c[1]), to_u8(c[2])]
        })
        .collect();
    RgbImage::from_raw(frame.width(), frame.height(), raw).unwrap_or_else(|| frame.clone())
}

fn luma3(p: &[f32; 3]) -> f32 {
    0.299 * p[0] + 0.587 * p[1] + 0.114 * p[2]
}

fn nearest(centres: &[[f32; 3]], p: &[f32; 3]) -> usize {
    let mut best = 0;
    let mut best_d = f32::MAX;
    for (i, c) in centres.iter().enumerate() {
        let d = (c[0] - p[0]).powi(2) + (c[1] - p[1]).powi(2) + (c[2] - p[2]).powi(2);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Oil-paint brush: each pixel takes the mean colour of the most common
/// intensity bucket in its neighbourhood.
pub fn oil_paint(frame: &RgbImage, radius: u32, levels: usize) -> RgbImage {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let r = radius as i64;
    let levels = levels.max(2);
    let src = frame.as_raw();
    let bucket: Vec<usize> = src
        .chunks_exact(3)
        .map(|p| {
            let i = (p[0] as usize + p[1] as usize + p[2] as usize) / 3;
            i * (levels - 1) / 255
        })
        .collect();

    let mut counts = vec![0u32; levels];
    let mut sums = vec![[0u32; 3]; levels];
    let mut out = vec![0u8; src.len()];

    for y in 0..h {
        for x in 0..w {
            counts.iter_mut().for_each(|c| *c = 0);
            sums.iter_mut().for_each(|s| *s = [0; 3]);
            for ny in (y - r).max(0)..=(y + r).min(h - 1) {
                for nx in (x - r).max(0)..=(x + r).min(w - 1) {
                    let pi = (ny * w + nx) as usize;
                    let b = bucket[pi];
                    counts[b] += 1;
                    sums[b][0] += src[pi * 3] as u32;
                    sums[b][1] += src[pi * 3 + 1] as u32;
                    sums[b][2] += src[pi * 3 + 2] as u32;
                }
            }
            let mut best = 0;
            for b in 1..levels {
                if counts[b] > counts[best] {
                    best = b;
                }
            }
            let n = counts[best].max(1);
            let oi = ((y * w + x) * 3) as usize;
            for c in 0..3 {
                out[oi + c] = (sums[best][c] / n) as u8;
            }
        }
    }

    RgbImage::from_raw(frame.width(), frame.height(), out).unwrap_or_else(|| frame.clone())
}

/// `v * gain + bias` on every channel.
pub fn adjust_contrast(frame: &mut RgbImage, gain: f32, bias: f32) {
    for v in frame.iter_mut() {
        *v = to_u8(*v as f32 * gain + bias);
    }
}

/// Paint pixels black where `mask` is false.
pub fn apply_ink(frame: &mut RgbImage, keep: &[bool]) {
    for (px, &k) in frame.pixels_mut().zip(keep) {
        if !k {
            px.0 = [0, 0, 0];
        }
    }
}
