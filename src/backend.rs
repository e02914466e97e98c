//! Pluggable implementations of the heavy per-pixel stages.
//!
//! [`CpuBackend`] is the reference. Other backends (GPU and the like) only
//! have to approximate it; when one fails the stage is rerun on the CPU and
//! the failure is logged.

use tracing::warn;

use crate::buffer::PixelBuffer;
use crate::config::Execution;
use crate::error::BackendError;
use crate::morphology::{self, Kernel};
use crate::pixelizer::downscale;

pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn dilate(
        &self,
        image: &PixelBuffer,
        kernel: &Kernel,
        iterations: u32,
    ) -> Result<PixelBuffer, BackendError>;

    fn erode(
        &self,
        image: &PixelBuffer,
        kernel: &Kernel,
        iterations: u32,
    ) -> Result<PixelBuffer, BackendError>;

    /// Contrast reduction to exactly `width`x`height` using
    /// `patch_size`-sided source blocks.
    fn contrast_downscale(
        &self,
        image: &PixelBuffer,
        width: u32,
        height: u32,
        patch_size: u32,
    ) -> Result<PixelBuffer, BackendError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend {
    pub execution: Execution,
}

impl CpuBackend {
    pub fn new(execution: Execution) -> Self {
        Self { execution }
    }

    pub fn dilate(&self, image: &PixelBuffer, kernel: &Kernel, iterations: u32) -> PixelBuffer {
        morphology::dilate_with(image, kernel, iterations, self.execution)
    }

    pub fn erode(&self, image: &PixelBuffer, kernel: &Kernel, iterations: u32) -> PixelBuffer {
        morphology::erode_with(image, kernel, iterations, self.execution)
    }

    pub fn contrast_downscale(
        &self,
        image: &PixelBuffer,
        width: u32,
        height: u32,
        patch_size: u32,
    ) -> PixelBuffer {
        downscale::contrast_reduce(image, width, height, patch_size, self.execution)
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn dilate(
        &self,
        image: &PixelBuffer,
        kernel: &Kernel,
        iterations: u32,
    ) -> Result<PixelBuffer, BackendError> {
        Ok(CpuBackend::dilate(self, image, kernel, iterations))
    }

    fn erode(
        &self,
        image: &PixelBuffer,
        kernel: &Kernel,
        iterations: u32,
    ) -> Result<PixelBuffer, BackendError> {
        Ok(CpuBackend::erode(self, image, kernel, iterations))
    }

    fn contrast_downscale(
        &self,
        image: &PixelBuffer,
        width: u32,
        height: u32,
        patch_size: u32,
    ) -> Result<PixelBuffer, BackendError> {
        Ok(CpuBackend::contrast_downscale(self, image, width, height, patch_size))
    }
}

/// Runs a stage on `backend`, falling back to `cpu` if it fails.
pub(crate) fn with_fallback<F, C>(backend: &dyn Backend, stage: &str, run: F, cpu: C) -> PixelBuffer
where
    F: FnOnce(&dyn Backend) -> Result<PixelBuffer, BackendError>,
    C: FnOnce() -> PixelBuffer,
{
    match run(backend) {
        Ok(image) => image,
        Err(err) => {
            warn!(backend = backend.name(), stage, error = %err, "backend failed, using cpu");
            cpu()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Backend whose every call fails.
    pub(crate) struct BrokenBackend;

    impl Backend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        fn dilate(&self, _: &PixelBuffer, _: &Kernel, _: u32) -> Result<PixelBuffer, BackendError> {
            Err(BackendError::new("broken", "no device"))
        }

        fn erode(&self, _: &PixelBuffer, _: &Kernel, _: u32) -> Result<PixelBuffer, BackendError> {
            Err(BackendError::new("broken", "no device"))
        }

        fn contrast_downscale(
            &self,
            _: &PixelBuffer,
            _: u32,
            _: u32,
            _: u32,
        ) -> Result<PixelBuffer, BackendError> {
            Err(BackendError::new("broken", "context lost"))
        }
    }

    #[test]
    fn fallback_uses_cpu_result() {
        let mut img = PixelBuffer::filled(4, 4, [0, 0, 0, 255]);
        img.put_pixel(1, 1, [255, 0, 0, 255]);
        let kernel = Kernel::expansion();
        let cpu = CpuBackend::default();

        let out = with_fallback(
            &BrokenBackend,
            "dilate",
            |b| b.dilate(&img, &kernel, 1),
            || cpu.dilate(&img, &kernel, 1),
        );
        assert_eq!(out, morphology::dilate(&img, &kernel, 1));
    }

    #[test]
    fn working_backend_is_used() {
        let img = PixelBuffer::filled(2, 2, [5, 5, 5, 255]);
        let out = with_fallback(
            &CpuBackend::default(),
            "erode",
            |_| Ok(PixelBuffer::filled(2, 2, [1, 1, 1, 255])),
            || img.clone(),
        );
        assert_eq!(out, PixelBuffer::filled(2, 2, [1, 1, 1, 255]));
    }
}
