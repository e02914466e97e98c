pub mod backend;
pub mod buffer;
pub mod color;
pub mod config;
pub mod error;
pub mod morphology;
mod pixelizer;

pub use backend::{Backend, CpuBackend};
pub use buffer::{PixelBuffer, WeightMap};
pub use config::{DitherMethod, DownscaleMode, Execution, PixelizeConfig, MAX_BAYER_SIZE};
pub use error::{BackendError, PixelizeError};
pub use morphology::{closing, dilate, erode, opening, Kernel};
pub use pixelizer::dither::{
    bayer_matrix, bayer_thresholds, dither, error_diffusion_dither, ordered_dither,
    quantize_and_dither,
};
pub use pixelizer::downscale::{
    contrast_downscale, k_centroid_downscale, k_centroid_downscale_with, resample_downscale,
    target_dimensions, Downscaler,
};
pub use pixelizer::outline::{expand, OutlineExpansion};
pub use pixelizer::quantize::{generate_palette, nearest_color, quantize, Palette};
pub use pixelizer::{stylize, OutlinePixelizer, Pixelizer, Stylized};
