use tracing::debug;

use crate::backend::{Backend, CpuBackend};
use crate::buffer::{PixelBuffer, WeightMap};
use crate::config::PixelizeConfig;
use crate::error::PixelizeError;

pub mod dither;
pub mod downscale;
mod kmeans;
pub mod outline;
pub mod quantize;

use downscale::Downscaler;
use outline::OutlineExpansion;
use quantize::Palette;

/// Result of a full pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct Stylized {
    pub image: PixelBuffer,
    /// Outline expansion weights at the input resolution, when expansion ran.
    pub weights: Option<WeightMap>,
    /// Palette the output was mapped onto, when quantization ran.
    pub palette: Option<Palette>,
}

pub trait Pixelizer {
    fn pixelize(&self, img: &PixelBuffer) -> Result<Stylized, PixelizeError>;
}

/// Outline expansion, then optional downscaling, then optional
/// quantization and dithering.
pub struct OutlinePixelizer {
    config: PixelizeConfig,
    backend: Box<dyn Backend>,
}

impl OutlinePixelizer {
    pub fn new(config: PixelizeConfig) -> Self {
        let backend = Box::new(CpuBackend::new(config.execution));
        Self { config, backend }
    }

    /// Runs morphology and contrast downscaling on `backend`; failures fall
    /// back to the CPU.
    pub fn with_backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(&self) -> &PixelizeConfig {
        &self.config
    }
}

impl Pixelizer for OutlinePixelizer {
    fn pixelize(&self, img: &PixelBuffer) -> Result<Stylized, PixelizeError> {
        let config = &self.config;
        config.validate()?;
        img.ensure_non_empty()?;
        debug!(
            width = img.width(),
            height = img.height(),
            backend = self.backend.name(),
            "pixelize"
        );

        let (mut image, weights) = if config.thickness > 0 {
            let expansion = OutlineExpansion::new(
                config.thickness,
                config.patch_size,
                config.avg_scale,
                config.dist_scale,
            );
            let (image, weights) = expansion.run(img, self.backend.as_ref(), config.execution)?;
            (image, Some(weights))
        } else {
            (img.clone(), None)
        };

        if let Some(mode) = config.downscale_mode {
            let downscaler = Downscaler {
                mode,
                target_size: config.target_size,
                k_centroids: config.k_centroids,
                execution: config.execution,
            };
            image = downscaler.run(&image, self.backend.as_ref())?;
        }

        let mut palette = None;
        if config.quantize {
            let (w, h) = image.dimensions();
            let importance = weights.as_ref().map(|map| map.resize_nearest(w, h));
            let (quantized, used) = dither::quantize_and_dither(
                &image,
                config.num_colors,
                config.dither_method,
                config.bayer_size,
                importance.as_ref(),
            )?;
            image = quantized;
            palette = Some(used);
        }

        Ok(Stylized {
            image,
            weights,
            palette,
        })
    }
}

/// Runs the whole pipeline on the CPU.
pub fn stylize(
    image: &PixelBuffer,
    config: &PixelizeConfig,
) -> Result<(PixelBuffer, Option<WeightMap>), PixelizeError> {
    let stylized = OutlinePixelizer::new(config.clone()).pixelize(image)?;
    Ok((stylized.image, stylized.weights))
}
