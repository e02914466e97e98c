//! Palette generation by weighted K-means and nearest-color mapping.

use std::collections::HashSet;

use tracing::debug;

use crate::buffer::{PixelBuffer, WeightMap};
use crate::color::{distance_sq, to_f32, to_u8};
use crate::error::PixelizeError;

use super::kmeans::{self, Convergence};

pub const MAX_ITERATIONS: usize = 50;
const CONVERGENCE: f32 = 1.0 / 256.0;
/// Below this many colors every seed lies on the min/max diagonal.
const PER_AXIS_SEEDING_FROM: usize = 8;

/// Ordered, non-empty list of RGB colors. Duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    pub fn new(colors: Vec<[u8; 3]>) -> Result<Self, PixelizeError> {
        if colors.is_empty() {
            return Err(PixelizeError::InvalidColorCount(0));
        }
        Ok(Self { colors })
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Index of the closest color (squared distance, first on ties).
    pub fn nearest(&self, rgb: [f32; 3]) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (i, &c) in self.colors.iter().enumerate() {
            let d = distance_sq(to_f32(c), rgb);
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }

    /// The two closest colors with their squared distances, closest first.
    /// A single-color palette returns that color twice.
    pub fn nearest_two(&self, rgb: [f32; 3]) -> ((usize, f32), (usize, f32)) {
        let mut first = (0, f32::INFINITY);
        let mut second = (0, f32::INFINITY);
        for (i, &c) in self.colors.iter().enumerate() {
            let d = distance_sq(to_f32(c), rgb);
            if d < first.1 {
                second = first;
                first = (i, d);
            } else if d < second.1 {
                second = (i, d);
            }
        }
        if second.1.is_infinite() {
            second = first;
        }
        (first, second)
    }

    pub fn color(&self, index: usize) -> [u8; 3] {
        self.colors[index]
    }
}

pub fn nearest_color(palette: &Palette, rgb: [u8; 3]) -> [u8; 3] {
    palette.color(palette.nearest(to_f32(rgb)))
}

/// Deterministic seeds: the min/max diagonal for small palettes, otherwise
/// a quarter of the colors along each channel axis through the box center
/// plus the rest on the diagonal.
pub(crate) fn palette_seeds(min: [f32; 3], max: [f32; 3], num_colors: usize) -> Vec<[f32; 3]> {
    if num_colors < PER_AXIS_SEEDING_FROM {
        return kmeans::interpolated_seeds(min, max, num_colors);
    }
    let per_axis = num_colors / 4;
    let center = kmeans::lerp(min, max, 0.5);
    let mut seeds = Vec::with_capacity(num_colors);
    for c in 0..3 {
        for i in 0..per_axis {
            let mut seed = center;
            seed[c] = min[c] + (max[c] - min[c]) * kmeans::seed_t(i, per_axis);
            seeds.push(seed);
        }
    }
    seeds.extend(kmeans::interpolated_seeds(min, max, num_colors - 3 * per_axis));
    seeds
}

fn distinct_colors(pixels: &[[u8; 3]], limit: usize) -> Option<Vec<[u8; 3]>> {
    let mut seen = HashSet::new();
    let mut colors = Vec::new();
    for &p in pixels {
        if seen.insert(p) {
            if colors.len() == limit {
                return None;
            }
            colors.push(p);
        }
    }
    Some(colors)
}

/// Palette of at most `num_colors` colors. `weights`, when given, scale how
/// much each pixel pulls on its cluster.
pub fn generate_palette(
    image: &PixelBuffer,
    num_colors: usize,
    weights: Option<&WeightMap>,
) -> Result<Palette, PixelizeError> {
    image.ensure_non_empty()?;
    if num_colors == 0 {
        return Err(PixelizeError::InvalidColorCount(num_colors));
    }
    if let Some(weights) = weights {
        if weights.dimensions() != image.dimensions() {
            return Err(PixelizeError::WeightMapMismatch {
                weights_width: weights.width(),
                weights_height: weights.height(),
                width: image.width(),
                height: image.height(),
            });
        }
    }

    let pixels = image.rgb_pixels();
    if let Some(colors) = distinct_colors(&pixels, num_colors) {
        debug!(colors = colors.len(), "image fits the palette, skipping k-means");
        return Palette::new(colors);
    }

    let points: Vec<[f32; 3]> = pixels.iter().map(|&p| to_f32(p)).collect();
    let (min, max) = kmeans::channel_bounds(&points);
    let clusters = kmeans::run(
        &points,
        weights.map(|w| w.values()),
        palette_seeds(min, max, num_colors),
        MAX_ITERATIONS,
        Convergence::TotalShift(CONVERGENCE),
    );

    let colors: Vec<[u8; 3]> = clusters
        .centroids
        .iter()
        .zip(&clusters.members)
        .filter(|(_, members)| **members > 0)
        .map(|(&c, _)| to_u8(c))
        .collect();
    debug!(
        requested = num_colors,
        colors = colors.len(),
        iterations = clusters.iterations,
        weighted = weights.is_some(),
        "palette generated"
    );
    Palette::new(colors)
}

/// Maps every pixel to its nearest palette color, alpha untouched.
pub fn quantize(image: &PixelBuffer, palette: &Palette) -> PixelBuffer {
    let mut out = image.clone();
    for px in out.as_raw_mut().chunks_exact_mut(4) {
        let rgb = nearest_color(palette, [px[0], px[1], px[2]]);
        px[..3].copy_from_slice(&rgb);
    }
    out
}
