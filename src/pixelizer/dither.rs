//! Ordered (Bayer) and Floyd-Steinberg dithering against a palette.

use tracing::debug;

use crate::buffer::{PixelBuffer, WeightMap};
use crate::color::to_f32;
use crate::config::{valid_bayer_size, DitherMethod};
use crate::error::PixelizeError;

use super::quantize::{generate_palette, quantize, Palette};

/// Integer Bayer matrix with entries `0..size²`, built by placing copies of
/// the half-size matrix in the quadrants with offsets following the 2x2
/// base pattern.
pub fn bayer_matrix(size: u32) -> Result<Vec<Vec<u32>>, PixelizeError> {
    if !valid_bayer_size(size) {
        return Err(PixelizeError::InvalidBayerSize(size));
    }
    Ok(build_bayer(size as usize))
}

fn build_bayer(size: usize) -> Vec<Vec<u32>> {
    match size {
        1 => vec![vec![0]],
        2 => vec![vec![0, 2], vec![3, 1]],
        _ => {
            let half = size / 2;
            let sub = build_bayer(half);
            let area = (half * half) as u32;
            // quadrant offsets: top-left 0, top-right 2, bottom-left 3, bottom-right 1
            let offset = [[0, 2], [3, 1]];
            (0..size)
                .map(|y| {
                    (0..size)
                        .map(|x| sub[y % half][x % half] + offset[y / half][x / half] * area)
                        .collect()
                })
                .collect()
        }
    }
}

/// Bayer matrix scaled to thresholds in [0, 1).
pub fn bayer_thresholds(size: u32) -> Result<Vec<Vec<f32>>, PixelizeError> {
    let matrix = bayer_matrix(size)?;
    let area = (size * size) as f32;
    Ok(matrix
        .into_iter()
        .map(|row| row.into_iter().map(|v| v as f32 / area).collect())
        .collect())
}

/// Chooses between the two nearest palette colors per pixel, using the
/// tiled threshold matrix against how close the pixel is to the nearest one.
pub fn ordered_dither(
    image: &PixelBuffer,
    palette: &Palette,
    bayer_size: u32,
) -> Result<PixelBuffer, PixelizeError> {
    let thresholds = bayer_thresholds(bayer_size)?;
    let n = bayer_size as usize;
    let mut out = image.clone();
    let width = image.width() as usize;
    for (i, px) in out.as_raw_mut().chunks_exact_mut(4).enumerate() {
        let (x, y) = (i % width, i / width);
        let rgb = to_f32([px[0], px[1], px[2]]);
        let ((first, d1), (second, d2)) = palette.nearest_two(rgb);
        let (d1, d2) = (d1.sqrt(), d2.sqrt());
        let chosen = if d1 == 0.0 || thresholds[y % n][x % n] > d1 / (d1 + d2) {
            first
        } else {
            second
        };
        px[..3].copy_from_slice(&palette.color(chosen));
    }
    Ok(out)
}

/// Floyd-Steinberg error diffusion in raster order.
pub fn error_diffusion_dither(image: &PixelBuffer, palette: &Palette) -> PixelBuffer {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let mut work: Vec<[f32; 3]> = image
        .as_raw()
        .chunks_exact(4)
        .map(|p| to_f32([p[0], p[1], p[2]]))
        .collect();
    let mut out = image.clone();

    let spread = |work: &mut [[f32; 3]], x: isize, y: usize, err: [f32; 3], fraction: f32| {
        if x < 0 || x as usize >= width || y >= height {
            return;
        }
        let target = &mut work[y * width + x as usize];
        for c in 0..3 {
            target[c] = (target[c] + err[c] * fraction).clamp(0.0, 255.0);
        }
    };

    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let old = work[i];
            let color = palette.color(palette.nearest(old));
            let new = to_f32(color);
            let err = [old[0] - new[0], old[1] - new[1], old[2] - new[2]];
            out.as_raw_mut()[i * 4..i * 4 + 3].copy_from_slice(&color);

            let xi = x as isize;
            spread(&mut work, xi + 1, y, err, 7.0 / 16.0);
            spread(&mut work, xi - 1, y + 1, err, 3.0 / 16.0);
            spread(&mut work, xi, y + 1, err, 5.0 / 16.0);
            spread(&mut work, xi + 1, y + 1, err, 1.0 / 16.0);
        }
    }
    out
}

/// Maps `image` onto `palette` with the requested dither method.
pub fn dither(
    image: &PixelBuffer,
    palette: &Palette,
    method: DitherMethod,
    bayer_size: u32,
) -> Result<PixelBuffer, PixelizeError> {
    match method {
        DitherMethod::None => Ok(quantize(image, palette)),
        DitherMethod::Ordered => ordered_dither(image, palette, bayer_size),
        DitherMethod::ErrorDiffusion => Ok(error_diffusion_dither(image, palette)),
    }
}

/// Builds a palette of at most `num_colors` colors and maps the image onto it.
pub fn quantize_and_dither(
    image: &PixelBuffer,
    num_colors: usize,
    method: DitherMethod,
    bayer_size: u32,
    weights: Option<&WeightMap>,
) -> Result<(PixelBuffer, Palette), PixelizeError> {
    if method == DitherMethod::Ordered && !valid_bayer_size(bayer_size) {
        return Err(PixelizeError::InvalidBayerSize(bayer_size));
    }
    let palette = generate_palette(image, num_colors, weights)?;
    debug!(colors = palette.len(), method = %method, "dithering");
    let out = dither(image, &palette, method, bayer_size)?;
    Ok((out, palette))
}
