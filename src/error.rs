use thiserror::Error;

/// Fatal configuration errors. Numeric degeneracies never show up here, they
/// are resolved inside the stage that meets them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PixelizeError {
    #[error("image dimensions cannot be zero, got {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    #[error("pixel buffer length {len} does not match dimensions {width}x{height}")]
    DimensionMismatch { len: usize, width: u32, height: u32 },

    #[error("patch size must be positive, got {0}")]
    InvalidPatchSize(u32),

    #[error("target size must be positive, got {0}")]
    InvalidTargetSize(u32),

    #[error("number of colors must be at least 1, got {0}")]
    InvalidColorCount(usize),

    #[error("number of centroids must be at least 1, got {0}")]
    InvalidCentroidCount(usize),

    #[error("unknown kernel index {0}, valid indices are 1 to 6")]
    UnknownKernel(usize),

    #[error("invalid kernel: {0}")]
    InvalidKernel(String),

    #[error("unknown downscale mode \"{0}\"")]
    UnknownDownscaleMode(String),

    #[error("unknown dither method \"{0}\"")]
    UnknownDitherMethod(String),

    #[error("bayer matrix size must be a power of two, got {0}")]
    InvalidBayerSize(u32),

    #[error("weight map is {weights_width}x{weights_height} but image is {width}x{height}")]
    WeightMapMismatch {
        weights_width: u32,
        weights_height: u32,
        width: u32,
        height: u32,
    },
}

/// Failure of an accelerated backend. Callers of the pipeline never see it:
/// the stage is rerun on the CPU.
#[derive(Debug, Error)]
#[error("{backend} backend failed: {reason}")]
pub struct BackendError {
    pub backend: String,
    pub reason: String,
}

impl BackendError {
    pub fn new(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}
