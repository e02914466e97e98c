//! Outline expansion.
//!
//! Local contrast statistics decide, per block, whether dark or bright
//! strokes get thickened: the image is blended between its eroded and
//! dilated versions, with a little of the original mixed back in, and the
//! seams are cleaned up with a cross-shaped erode/dilate pass.

use tracing::debug;

use crate::backend::{with_fallback, Backend, CpuBackend};
use crate::buffer::{PixelBuffer, WeightMap};
use crate::color::luminance;
use crate::config::Execution;
use crate::error::PixelizeError;
use crate::morphology::Kernel;

use super::downscale::median;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Weight given back to the original pixel, always in (0, 0.25).
#[inline]
pub fn original_weight(weight: f32) -> f32 {
    sigmoid((weight - 0.5) * 5.0) * 0.25
}

/// Block stride of the statistics scan: half the patch, rounded up to even.
fn block_stride(patch_size: u32) -> u32 {
    let half = patch_size / 2;
    ((half + 1) / 2 * 2).max(1)
}

/// Per-pixel (median, max, min) luminance. Every pixel of a stride-sized
/// block shares the statistics of the windows centered on that block.
pub(crate) fn patch_statistics(
    luma: &[f32],
    width: u32,
    height: u32,
    patch_size: u32,
) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let n = luma.len();
    let mut avg = vec![0f32; n];
    let mut max = vec![0f32; n];
    let mut min = vec![0f32; n];
    let stride = block_stride(patch_size);
    let p = patch_size as i64;

    let window = |cx: i64, cy: i64, before: i64, after: i64| {
        let x0 = (cx - before).max(0) as u32;
        let x1 = (cx + after).min(width as i64).max(x0 as i64 + 1) as u32;
        let y0 = (cy - before).max(0) as u32;
        let y1 = (cy + after).min(height as i64).max(y0 as i64 + 1) as u32;
        (x0, x1.min(width), y0, y1.min(height))
    };

    let side = (patch_size as usize).saturating_mul(2);
    let mut values = Vec::with_capacity(side.saturating_mul(side).min(n));
    let mut by = 0;
    while by < height {
        let bh = stride.min(height - by);
        let cy = (by + stride / 2).min(height - 1) as i64;
        let mut bx = 0;
        while bx < width {
            let bw = stride.min(width - bx);
            let cx = (bx + stride / 2).min(width - 1) as i64;

            values.clear();
            let (x0, x1, y0, y1) = window(cx, cy, p, p);
            for y in y0..y1 {
                let row = (y * width) as usize;
                values.extend_from_slice(&luma[row + x0 as usize..row + x1 as usize]);
            }
            let block_avg = median(&mut values);

            let mut block_max = f32::NEG_INFINITY;
            let mut block_min = f32::INFINITY;
            let (x0, x1, y0, y1) = window(cx, cy, p / 2, p - p / 2);
            for y in y0..y1 {
                let row = (y * width) as usize;
                for &v in &luma[row + x0 as usize..row + x1 as usize] {
                    block_max = block_max.max(v);
                    block_min = block_min.min(v);
                }
            }

            for y in by..by + bh {
                let row = (y * width) as usize;
                for x in bx..bx + bw {
                    avg[row + x as usize] = block_avg;
                    max[row + x as usize] = block_max;
                    min[row + x as usize] = block_min;
                }
            }
            bx += stride;
        }
        by += stride;
    }
    (avg, max, min)
}

/// Contrast weights in [0, 1]. High where the neighbourhood is bright and
/// its dark tail is long, so eroding (spreading dark) wins there.
pub(crate) fn contrast_weights(
    image: &PixelBuffer,
    patch_size: u32,
    avg_scale: f32,
    dist_scale: f32,
) -> Vec<f32> {
    let luma: Vec<f32> = image
        .as_raw()
        .chunks_exact(4)
        .map(|p| luminance([p[0], p[1], p[2]]))
        .collect();
    let (avg, max, min) = patch_statistics(&luma, image.width(), image.height(), patch_size);

    let mut weights: Vec<f32> = (0..luma.len())
        .map(|i| {
            let raw = (avg[i] - 0.5) * avg_scale
                - ((max[i] - avg[i]) - (avg[i] - min[i])) * dist_scale;
            sigmoid(raw)
        })
        .collect();

    let lo = weights.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = weights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = hi - lo;
    if range > f32::EPSILON {
        for w in &mut weights {
            *w = ((*w - lo) / range).clamp(0.0, 1.0);
        }
    }
    weights
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlineExpansion {
    pub erode_iters: u32,
    pub dilate_iters: u32,
    pub patch_size: u32,
    pub avg_scale: f32,
    pub dist_scale: f32,
}

impl OutlineExpansion {
    pub fn new(thickness: u32, patch_size: u32, avg_scale: f32, dist_scale: f32) -> Self {
        Self {
            erode_iters: thickness,
            dilate_iters: thickness,
            patch_size,
            avg_scale,
            dist_scale,
        }
    }

    /// Returns the stylized image and the diagnostic weight map.
    pub fn run(
        &self,
        image: &PixelBuffer,
        backend: &dyn Backend,
        execution: Execution,
    ) -> Result<(PixelBuffer, WeightMap), PixelizeError> {
        image.ensure_non_empty()?;
        if self.patch_size == 0 {
            return Err(PixelizeError::InvalidPatchSize(self.patch_size));
        }
        debug!(
            erode = self.erode_iters,
            dilate = self.dilate_iters,
            patch = self.patch_size,
            "outline expansion"
        );

        let cpu = CpuBackend::new(execution);
        let dilate = |img: &PixelBuffer, kernel: &Kernel, iters: u32| {
            with_fallback(
                backend,
                "dilate",
                |b| b.dilate(img, kernel, iters),
                || cpu.dilate(img, kernel, iters),
            )
        };
        let erode = |img: &PixelBuffer, kernel: &Kernel, iters: u32| {
            with_fallback(
                backend,
                "erode",
                |b| b.erode(img, kernel, iters),
                || cpu.erode(img, kernel, iters),
            )
        };

        let weights = contrast_weights(image, self.patch_size, self.avg_scale, self.dist_scale);

        let expansion = Kernel::expansion();
        let eroded = erode(image, &expansion, self.erode_iters);
        let dilated = dilate(image, &expansion, self.dilate_iters);

        let mut blended = PixelBuffer::new(image.width(), image.height());
        {
            let out = blended.as_raw_mut();
            let orig = image.as_raw();
            let (er, di) = (eroded.as_raw(), dilated.as_raw());
            for (i, &w) in weights.iter().enumerate() {
                let ow = original_weight(w);
                for c in i * 4..i * 4 + 4 {
                    let blend = er[c] as f32 * w + di[c] as f32 * (1.0 - w);
                    let v = blend * (1.0 - ow) + orig[c] as f32 * ow;
                    out[c] = v.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        let cross = Kernel::cross();
        let cleaned = erode(&blended, &cross, self.erode_iters);
        let cleaned = dilate(&cleaned, &cross, self.dilate_iters * 2);
        let cleaned = erode(&cleaned, &cross, self.erode_iters);

        let mut diagnostic = PixelBuffer::new(image.width(), image.height());
        for (px, &w) in diagnostic.as_raw_mut().chunks_exact_mut(4).zip(&weights) {
            let v = ((w * 2.0 - 1.0).abs() * 255.0).round() as u8;
            px.copy_from_slice(&[v, v, v, 255]);
        }
        let diagnostic = dilate(&diagnostic, &expansion, self.dilate_iters);
        let values = diagnostic
            .as_raw()
            .chunks_exact(4)
            .map(|p| p[0] as f32 / 255.0)
            .collect();
        let weight_map = WeightMap::from_values(image.width(), image.height(), values)?;

        Ok((cleaned, weight_map))
    }
}

/// Outline expansion on the CPU backend.
pub fn expand(
    image: &PixelBuffer,
    erode_iters: u32,
    dilate_iters: u32,
    patch_size: u32,
    avg_scale: f32,
    dist_scale: f32,
) -> Result<(PixelBuffer, WeightMap), PixelizeError> {
    let expansion = OutlineExpansion {
        erode_iters,
        dilate_iters,
        patch_size,
        avg_scale,
        dist_scale,
    };
    expansion.run(image, &CpuBackend::default(), Execution::Sequential)
}
