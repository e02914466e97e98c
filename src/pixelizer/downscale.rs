//! Reduction of a full resolution image to the pixel-art grid.

use image::imageops::FilterType;
use palette::Lab;
use rayon::prelude::*;
use tracing::debug;

use crate::backend::{with_fallback, Backend, CpuBackend};
use crate::buffer::PixelBuffer;
use crate::color::{lab_to_rgb, rgb_to_lab, to_u8};
use crate::config::{DownscaleMode, Execution};
use crate::error::PixelizeError;

use super::kmeans::{self, Convergence};

const K_CENTROID_MAX_ITERATIONS: usize = 10;
const K_CENTROID_MAX_SHIFT: f32 = 1.0;

/// Output size keeping the aspect ratio, with `target_size` standing in for
/// the side of a square of the same pixel count.
pub fn target_dimensions(width: u32, height: u32, target_size: u32) -> (u32, u32) {
    let ratio = width as f64 / height as f64;
    let ts = target_size as f64;
    let target_h = (ts * ts / ratio).sqrt().floor().max(1.0);
    let target_w = (target_h * ratio).floor().max(1.0);
    (target_w as u32, target_h as u32)
}

/// Side of the source block that maps to one output pixel.
pub fn patch_size_for(width: u32, height: u32, target_w: u32, target_h: u32) -> u32 {
    let ph = (height as f64 / target_h as f64).round();
    let pw = (width as f64 / target_w as f64).round();
    ph.max(pw).max(1.0) as u32
}

/// Median, averaging the two middle values for even counts. Sorts in place.
pub(crate) fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn validate(image: &PixelBuffer, target_size: u32) -> Result<(), PixelizeError> {
    image.ensure_non_empty()?;
    if target_size == 0 {
        return Err(PixelizeError::InvalidTargetSize(target_size));
    }
    Ok(())
}

pub fn contrast_downscale(image: &PixelBuffer, target_size: u32) -> Result<PixelBuffer, PixelizeError> {
    validate(image, target_size)?;
    let (w, h) = image.dimensions();
    let (tw, th) = target_dimensions(w, h, target_size);
    let patch = patch_size_for(w, h, tw, th);
    Ok(contrast_reduce(image, tw, th, patch, Execution::Sequential))
}

/// Fills every `patch`-sided block with one contrast-aware color, then
/// samples the result down to `target_w`x`target_h`.
pub(crate) fn contrast_reduce(
    image: &PixelBuffer,
    target_w: u32,
    target_h: u32,
    patch: u32,
    execution: Execution,
) -> PixelBuffer {
    let patch = patch.max(1);
    let mut out = image.clone();
    let band_len = image.width() as usize * 4 * patch as usize;

    let fill_band = |(band, rows): (usize, &mut [u8])| {
        let y0 = band as u32 * patch;
        let band_h = (rows.len() / (image.width() as usize * 4)) as u32;
        let mut bx = 0;
        while bx < image.width() {
            let bw = patch.min(image.width() - bx);
            let rgb = contrast_block_color(image, bx, y0, bw, band_h);
            for y in 0..band_h {
                for x in bx..bx + bw {
                    let i = (y as usize * image.width() as usize + x as usize) * 4;
                    rows[i..i + 3].copy_from_slice(&rgb);
                }
            }
            bx += patch;
        }
    };

    match execution {
        Execution::Sequential => out
            .as_raw_mut()
            .chunks_mut(band_len)
            .enumerate()
            .for_each(fill_band),
        Execution::Parallel => out
            .as_raw_mut()
            .par_chunks_mut(band_len)
            .enumerate()
            .for_each(fill_band),
    }

    out.resize(target_w, target_h, FilterType::Nearest)
}

fn contrast_block_color(image: &PixelBuffer, x0: u32, y0: u32, bw: u32, bh: u32) -> [u8; 3] {
    let n = (bw * bh) as usize;
    let mut ls = Vec::with_capacity(n);
    let mut as_ = Vec::with_capacity(n);
    let mut bs = Vec::with_capacity(n);
    for y in y0..y0 + bh {
        for x in x0..x0 + bw {
            let [r, g, b, _] = image.pixel(x, y);
            let lab = rgb_to_lab([r, g, b]);
            ls.push(lab.l);
            as_.push(lab.a);
            bs.push(lab.b);
        }
    }

    let [r, g, b, _] = image.pixel(x0 + bw / 2, y0 + bh / 2);
    let middle = rgb_to_lab([r, g, b]).l;

    let mean = ls.iter().sum::<f32>() / n as f32;
    let max = ls.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min = ls.iter().copied().fold(f32::INFINITY, f32::min);
    let med = median(&mut ls);

    let l = if med < mean && (max - med) > (med - min) {
        min
    } else if med > mean && (max - med) < (med - min) {
        max
    } else {
        middle
    };

    lab_to_rgb(Lab::new(l, median(&mut as_), median(&mut bs)))
}

pub fn k_centroid_downscale(
    image: &PixelBuffer,
    target_size: u32,
    k: usize,
) -> Result<PixelBuffer, PixelizeError> {
    k_centroid_downscale_with(image, target_size, k, Execution::Sequential)
}

pub fn k_centroid_downscale_with(
    image: &PixelBuffer,
    target_size: u32,
    k: usize,
    execution: Execution,
) -> Result<PixelBuffer, PixelizeError> {
    validate(image, target_size)?;
    if k == 0 {
        return Err(PixelizeError::InvalidCentroidCount(k));
    }
    let (w, h) = image.dimensions();
    let (tw, th) = target_dimensions(w, h, target_size);
    debug!(width = tw, height = th, k, "k-centroid downscale");

    let mut out = PixelBuffer::new(tw, th);
    let fill_row = |(y, row): (usize, &mut [u8])| {
        let y = y as u32;
        let (y0, y1) = source_span(y, th, h);
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let (x0, x1) = source_span(x as u32, tw, w);
            px.copy_from_slice(&k_centroid_block(image, x0, x1, y0, y1, k));
        }
    };
    match execution {
        Execution::Sequential => out
            .as_raw_mut()
            .chunks_mut(tw as usize * 4)
            .enumerate()
            .for_each(fill_row),
        Execution::Parallel => out
            .as_raw_mut()
            .par_chunks_mut(tw as usize * 4)
            .enumerate()
            .for_each(fill_row),
    }
    Ok(out)
}

/// Source range `[start, end)` covered by output index `i`, never empty.
fn source_span(i: u32, target: u32, source: u32) -> (u32, u32) {
    let start = ((i as u64 * source as u64) / target as u64) as u32;
    let end = (((i as u64 + 1) * source as u64) / target as u64) as u32;
    let start = start.min(source - 1);
    (start, end.clamp(start + 1, source))
}

fn k_centroid_block(image: &PixelBuffer, x0: u32, x1: u32, y0: u32, y1: u32, k: usize) -> [u8; 4] {
    let mut points = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
    for y in y0..y1 {
        for x in x0..x1 {
            let [r, g, b, _] = image.pixel(x, y);
            points.push([r as f32, g as f32, b as f32]);
        }
    }
    let center = image.pixel((x0 + x1) / 2, (y0 + y1) / 2);

    let rgb = if k >= points.len() {
        let n = points.len() as f32;
        let sum = points.iter().fold([0f32; 3], |acc, p| {
            [acc[0] + p[0], acc[1] + p[1], acc[2] + p[2]]
        });
        to_u8([sum[0] / n, sum[1] / n, sum[2] / n])
    } else {
        let (min, max) = kmeans::channel_bounds(&points);
        let clusters = kmeans::run(
            &points,
            None,
            kmeans::interpolated_seeds(min, max, k),
            K_CENTROID_MAX_ITERATIONS,
            Convergence::MaxShift(K_CENTROID_MAX_SHIFT),
        );
        let c = [center[0] as f32, center[1] as f32, center[2] as f32];
        to_u8(clusters.centroids[kmeans::nearest(&clusters.centroids, c)])
    };
    [rgb[0], rgb[1], rgb[2], center[3]]
}

/// Plain resampling to the target grid with a standard filter.
pub fn resample_downscale(
    image: &PixelBuffer,
    target_size: u32,
    filter: FilterType,
) -> Result<PixelBuffer, PixelizeError> {
    validate(image, target_size)?;
    let (tw, th) = target_dimensions(image.width(), image.height(), target_size);
    Ok(image.resize(tw, th, filter))
}

/// Downscale stage as the pipeline runs it.
#[derive(Debug, Clone, Copy)]
pub struct Downscaler {
    pub mode: DownscaleMode,
    pub target_size: u32,
    pub k_centroids: usize,
    pub execution: Execution,
}

impl Downscaler {
    pub fn run(&self, image: &PixelBuffer, backend: &dyn Backend) -> Result<PixelBuffer, PixelizeError> {
        validate(image, self.target_size)?;
        let (w, h) = image.dimensions();
        let (tw, th) = target_dimensions(w, h, self.target_size);
        debug!(mode = %self.mode, from_w = w, from_h = h, to_w = tw, to_h = th, "downscale");
        match self.mode {
            DownscaleMode::Contrast => {
                let patch = patch_size_for(w, h, tw, th);
                let cpu = CpuBackend::new(self.execution);
                Ok(with_fallback(
                    backend,
                    "contrast_downscale",
                    |b| b.contrast_downscale(image, tw, th, patch),
                    || cpu.contrast_downscale(image, tw, th, patch),
                ))
            }
            DownscaleMode::KCentroid => {
                k_centroid_downscale_with(image, self.target_size, self.k_centroids, self.execution)
            }
            DownscaleMode::Nearest => Ok(image.resize(tw, th, FilterType::Nearest)),
            DownscaleMode::Bilinear => Ok(image.resize(tw, th, FilterType::Triangle)),
            DownscaleMode::Lanczos => Ok(image.resize(tw, th, FilterType::Lanczos3)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::BrokenBackend;

    fn assert_close(actual: [u8; 4], expected: [u8; 4]) {
        for c in 0..4 {
            assert!(
                (actual[c] as i32 - expected[c] as i32).abs() <= 1,
                "{actual:?} != {expected:?}"
            );
        }
    }

    #[test]
    fn target_dimensions_keep_aspect() {
        assert_eq!(target_dimensions(100, 100, 10), (10, 10));
        assert_eq!(target_dimensions(100, 50, 10), (14, 7));
        assert_eq!(target_dimensions(50, 100, 10), (7, 14));
        assert_eq!(target_dimensions(3, 3, 1), (1, 1));
        assert_eq!(patch_size_for(100, 50, 14, 7), 7);
    }

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn k_centroid_uniform_stays_uniform() {
        let img = PixelBuffer::filled(37, 23, [90, 140, 200, 255]);
        for target in [1, 4, 10, 64] {
            for k in [1, 2, 5] {
                let out = k_centroid_downscale(&img, target, k).unwrap();
                let (tw, th) = target_dimensions(37, 23, target);
                assert_eq!(out, PixelBuffer::filled(tw, th, [90, 140, 200, 255]));
            }
        }
    }

    #[test]
    fn k_centroid_picks_cluster_of_center_pixel() {
        let mut img = PixelBuffer::filled(4, 4, [0, 0, 0, 255]);
        for y in 0..4 {
            for x in 2..4 {
                img.put_pixel(x, y, [255, 255, 255, 255]);
            }
        }
        let out = k_centroid_downscale(&img, 1, 2).unwrap();
        assert_eq!(out.dimensions(), (1, 1));
        assert_eq!(out.pixel(0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn k_centroid_small_block_falls_back_to_mean() {
        let img = PixelBuffer::from_rgb(2, 2, &[[0, 0, 0], [100, 0, 0], [0, 100, 0], [0, 0, 100]]).unwrap();
        let out = k_centroid_downscale(&img, 1, 4).unwrap();
        assert_eq!(out.pixel(0, 0), [25, 25, 25, 255]);
    }

    #[test]
    fn k_centroid_rejects_zero_k() {
        let img = PixelBuffer::filled(2, 2, [0, 0, 0, 255]);
        assert_eq!(
            k_centroid_downscale(&img, 1, 0),
            Err(PixelizeError::InvalidCentroidCount(0))
        );
    }

    #[test]
    fn contrast_uniform_stays_uniform() {
        let img = PixelBuffer::filled(20, 12, [128, 128, 128, 255]);
        let out = contrast_downscale(&img, 5).unwrap();
        assert_eq!(out.dimensions(), target_dimensions(20, 12, 5));
        for y in 0..out.height() {
            for x in 0..out.width() {
                assert_close(out.pixel(x, y), [128, 128, 128, 255]);
            }
        }
    }

    #[test]
    fn contrast_keeps_minority_dark_detail() {
        // mostly dark block with a few bright pixels: median below mean and
        // the bright tail longer, so the darkest value wins
        let mut img = PixelBuffer::filled(4, 4, [0, 0, 0, 255]);
        img.put_pixel(0, 0, [255, 255, 255, 255]);
        img.put_pixel(3, 3, [255, 255, 255, 255]);
        let out = contrast_downscale(&img, 1).unwrap();
        assert_close(out.pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn contrast_ambiguous_block_uses_middle_pixel() {
        // median above mean but the bright tail is the longer one: neither
        // extreme is picked, the center pixel's lightness is kept
        let grays = [90, 92, 150, 152, 94, 154, 156, 158, 255];
        let pixels: Vec<[u8; 3]> = grays.iter().map(|&v| [v, v, v]).collect();
        let img = PixelBuffer::from_rgb(3, 3, &pixels).unwrap();
        let out = contrast_downscale(&img, 1).unwrap();
        assert_close(out.pixel(0, 0), [94, 94, 94, 255]);
    }

    #[test]
    fn contrast_parallel_matches_sequential() {
        let mut img = PixelBuffer::new(30, 18);
        for y in 0..18 {
            for x in 0..30 {
                img.put_pixel(x, y, [(x * 8) as u8, (y * 13) as u8, ((x + y) * 5) as u8, 255]);
            }
        }
        let (tw, th) = target_dimensions(30, 18, 6);
        let patch = patch_size_for(30, 18, tw, th);
        assert_eq!(
            contrast_reduce(&img, tw, th, patch, Execution::Parallel),
            contrast_reduce(&img, tw, th, patch, Execution::Sequential)
        );
    }

    #[test]
    fn downscaler_falls_back_to_cpu() {
        let img = PixelBuffer::filled(16, 16, [40, 80, 120, 255]);
        let downscaler = Downscaler {
            mode: DownscaleMode::Contrast,
            target_size: 4,
            k_centroids: 2,
            execution: Execution::Sequential,
        };
        let out = downscaler.run(&img, &BrokenBackend).unwrap();
        assert_eq!(out, contrast_downscale(&img, 4).unwrap());
    }

    #[test]
    fn resampling_modes_hit_target_size() {
        let img = PixelBuffer::filled(40, 20, [1, 2, 3, 255]);
        for mode in [DownscaleMode::Nearest, DownscaleMode::Bilinear, DownscaleMode::Lanczos] {
            let downscaler = Downscaler {
                mode,
                target_size: 8,
                k_centroids: 2,
                execution: Execution::Sequential,
            };
            let out = downscaler.run(&img, &CpuBackend::default()).unwrap();
            assert_eq!(out.dimensions(), target_dimensions(40, 20, 8));
        }
        assert_eq!(
            resample_downscale(&img, 8, FilterType::Nearest).unwrap().dimensions(),
            (10, 5)
        );
    }

    #[test]
    fn empty_image_is_rejected() {
        let img = PixelBuffer::new(0, 5);
        assert_eq!(
            contrast_downscale(&img, 4),
            Err(PixelizeError::EmptyImage { width: 0, height: 5 })
        );
    }
}
