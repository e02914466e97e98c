use std::fmt;
use std::str::FromStr;

use crate::error::PixelizeError;

/// How a full-resolution image is reduced to the target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownscaleMode {
    /// Per-block luminance pick in LAB, then nearest resample.
    Contrast,
    /// Per-output-pixel K-means over the source block.
    KCentroid,
    Nearest,
    Bilinear,
    Lanczos,
}

impl DownscaleMode {
    pub const ALL: [DownscaleMode; 5] = [
        DownscaleMode::Contrast,
        DownscaleMode::KCentroid,
        DownscaleMode::Nearest,
        DownscaleMode::Bilinear,
        DownscaleMode::Lanczos,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DownscaleMode::Contrast => "contrast",
            DownscaleMode::KCentroid => "k-centroid",
            DownscaleMode::Nearest => "nearest",
            DownscaleMode::Bilinear => "bilinear",
            DownscaleMode::Lanczos => "lanczos",
        }
    }
}

impl FromStr for DownscaleMode {
    type Err = PixelizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DownscaleMode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| PixelizeError::UnknownDownscaleMode(s.to_string()))
    }
}

impl fmt::Display for DownscaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitherMethod {
    #[default]
    None,
    Ordered,
    ErrorDiffusion,
}

impl DitherMethod {
    pub const ALL: [DitherMethod; 3] = [
        DitherMethod::None,
        DitherMethod::Ordered,
        DitherMethod::ErrorDiffusion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DitherMethod::None => "none",
            DitherMethod::Ordered => "ordered",
            DitherMethod::ErrorDiffusion => "error-diffusion",
        }
    }
}

impl FromStr for DitherMethod {
    type Err = PixelizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DitherMethod::ALL
            .into_iter()
            .find(|method| method.name() == s)
            .ok_or_else(|| PixelizeError::UnknownDitherMethod(s.to_string()))
    }
}

impl fmt::Display for DitherMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether per-row work runs on the calling thread or on the rayon pool.
/// Both produce identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelizeConfig {
    /// Erode and dilate iteration count of the outline expansion. 0 skips it.
    pub thickness: u32,
    /// Side of the statistics window.
    pub patch_size: u32,
    pub avg_scale: f32,
    pub dist_scale: f32,
    /// `None` keeps the full resolution.
    pub downscale_mode: Option<DownscaleMode>,
    pub target_size: u32,
    pub k_centroids: usize,
    pub quantize: bool,
    pub num_colors: usize,
    pub dither_method: DitherMethod,
    /// Side of the ordered dither threshold matrix.
    pub bayer_size: u32,
    pub execution: Execution,
}

impl Default for PixelizeConfig {
    fn default() -> Self {
        Self {
            thickness: 1,
            patch_size: 16,
            avg_scale: 10.0,
            dist_scale: 3.0,
            downscale_mode: Some(DownscaleMode::Contrast),
            target_size: 128,
            k_centroids: 2,
            quantize: false,
            num_colors: 32,
            dither_method: DitherMethod::None,
            bayer_size: 4,
            execution: Execution::Sequential,
        }
    }
}

/// Largest ordered dither matrix side.
pub const MAX_BAYER_SIZE: u32 = 256;

/// Bayer sizes are powers of two up to [`MAX_BAYER_SIZE`].
pub(crate) fn valid_bayer_size(size: u32) -> bool {
    size.is_power_of_two() && size <= MAX_BAYER_SIZE
}

impl PixelizeConfig {
    /// Checks every option the enabled stages will read.
    pub fn validate(&self) -> Result<(), PixelizeError> {
        if self.thickness > 0 && self.patch_size == 0 {
            return Err(PixelizeError::InvalidPatchSize(self.patch_size));
        }
        if let Some(mode) = self.downscale_mode {
            if self.target_size == 0 {
                return Err(PixelizeError::InvalidTargetSize(self.target_size));
            }
            if mode == DownscaleMode::KCentroid && self.k_centroids == 0 {
                return Err(PixelizeError::InvalidCentroidCount(self.k_centroids));
            }
        }
        if self.quantize {
            if self.num_colors == 0 {
                return Err(PixelizeError::InvalidColorCount(self.num_colors));
            }
            if self.dither_method == DitherMethod::Ordered && !valid_bayer_size(self.bayer_size) {
                return Err(PixelizeError::InvalidBayerSize(self.bayer_size));
            }
        }
        Ok(())
    }
}
