//! Grayscale morphology on RGBA buffers, channel by channel.
//!
//! Borders replicate the nearest edge pixel. Binary kernels take the plain
//! neighbourhood extremum; fractional (anti-aliased) kernels shift each
//! normalized sample by its weight before taking the extremum.

use rayon::prelude::*;

use crate::buffer::PixelBuffer;
use crate::config::Execution;
use crate::error::PixelizeError;

/// Number of predefined circular kernels.
pub const CIRCULAR_KERNELS: usize = 6;

/// Square structuring element with weights in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    size: usize,
    weights: Vec<f32>,
    binary: bool,
}

impl Kernel {
    /// `weights` is row-major, `size`x`size`, with an odd side.
    pub fn new(size: usize, weights: Vec<f32>) -> Result<Self, PixelizeError> {
        if size == 0 || size % 2 == 0 {
            return Err(PixelizeError::InvalidKernel(format!(
                "side must be odd, got {size}"
            )));
        }
        if weights.len() != size * size {
            return Err(PixelizeError::InvalidKernel(format!(
                "expected {} weights, got {}",
                size * size,
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !(0.0..=1.0).contains(*w)) {
            return Err(PixelizeError::InvalidKernel(format!(
                "weight {w} outside [0, 1]"
            )));
        }
        if weights.iter().all(|&w| w == 0.0) {
            return Err(PixelizeError::InvalidKernel("no enabled cells".into()));
        }
        let binary = weights.iter().all(|&w| w == 0.0 || w == 1.0);
        Ok(Self {
            size,
            weights,
            binary,
        })
    }

    /// 3x3 all ones.
    pub fn expansion() -> Self {
        Self {
            size: 3,
            weights: vec![1.0; 9],
            binary: true,
        }
    }

    /// 3x3 cross.
    pub fn cross() -> Self {
        #[rustfmt::skip]
        let weights = vec![
            0.0, 1.0, 0.0,
            1.0, 1.0, 1.0,
            0.0, 1.0, 0.0,
        ];
        Self {
            size: 3,
            weights,
            binary: true,
        }
    }

    /// Anti-aliased disc of radius `index`, for `index` in 1..=6. Each cell
    /// weighs how much of it falls inside the disc.
    pub fn circular(index: usize) -> Result<Self, PixelizeError> {
        if !(1..=CIRCULAR_KERNELS).contains(&index) {
            return Err(PixelizeError::UnknownKernel(index));
        }
        let radius = index as f32;
        let size = 2 * index + 1;
        let mut weights = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                let dx = x as f32 - index as f32;
                let dy = y as f32 - index as f32;
                let dist = (dx * dx + dy * dy).sqrt();
                weights.push((radius + 0.5 - dist).clamp(0.0, 1.0));
            }
        }
        Self::new(size, weights)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn weight(&self, x: usize, y: usize) -> f32 {
        self.weights[y * self.size + x]
    }

    /// Enabled cells as (dx, dy, weight) offsets from the center.
    fn taps(&self) -> Vec<(i64, i64, f32)> {
        let r = (self.size / 2) as i64;
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0.0)
            .map(|(i, &w)| ((i % self.size) as i64 - r, (i / self.size) as i64 - r, w))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Dilate,
    Erode,
}

pub fn dilate(image: &PixelBuffer, kernel: &Kernel, iterations: u32) -> PixelBuffer {
    morph(image, kernel, iterations, Op::Dilate, Execution::Sequential)
}

pub fn erode(image: &PixelBuffer, kernel: &Kernel, iterations: u32) -> PixelBuffer {
    morph(image, kernel, iterations, Op::Erode, Execution::Sequential)
}

pub fn dilate_with(
    image: &PixelBuffer,
    kernel: &Kernel,
    iterations: u32,
    execution: Execution,
) -> PixelBuffer {
    morph(image, kernel, iterations, Op::Dilate, execution)
}

pub fn erode_with(
    image: &PixelBuffer,
    kernel: &Kernel,
    iterations: u32,
    execution: Execution,
) -> PixelBuffer {
    morph(image, kernel, iterations, Op::Erode, execution)
}

/// Erosion followed by dilation.
pub fn opening(image: &PixelBuffer, kernel: &Kernel, iterations: u32) -> PixelBuffer {
    dilate(&erode(image, kernel, iterations), kernel, iterations)
}

/// Dilation followed by erosion.
pub fn closing(image: &PixelBuffer, kernel: &Kernel, iterations: u32) -> PixelBuffer {
    erode(&dilate(image, kernel, iterations), kernel, iterations)
}

fn morph(
    image: &PixelBuffer,
    kernel: &Kernel,
    iterations: u32,
    op: Op,
    execution: Execution,
) -> PixelBuffer {
    if iterations == 0 || image.is_empty() {
        return image.clone();
    }
    let taps = kernel.taps();
    let row_len = image.width() as usize * 4;

    // ping-pong between two buffers
    let mut src = image.clone();
    let mut dst = PixelBuffer::new(image.width(), image.height());
    for _ in 0..iterations {
        let source = &src;
        let rows = dst.as_raw_mut();
        match execution {
            Execution::Sequential => rows
                .chunks_mut(row_len)
                .enumerate()
                .for_each(|(y, row)| morph_row(source, y as i64, &taps, kernel.binary, op, row)),
            Execution::Parallel => rows
                .par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(y, row)| morph_row(source, y as i64, &taps, kernel.binary, op, row)),
        }
        std::mem::swap(&mut src, &mut dst);
    }
    src
}

fn morph_row(
    src: &PixelBuffer,
    y: i64,
    taps: &[(i64, i64, f32)],
    binary: bool,
    op: Op,
    row: &mut [u8],
) {
    for (x, out) in row.chunks_exact_mut(4).enumerate() {
        let x = x as i64;
        if binary {
            let mut acc = match op {
                Op::Dilate => [0u8; 4],
                Op::Erode => [255u8; 4],
            };
            for &(dx, dy, _) in taps {
                let p = src.pixel_clamped(x + dx, y + dy);
                for c in 0..4 {
                    acc[c] = match op {
                        Op::Dilate => acc[c].max(p[c]),
                        Op::Erode => acc[c].min(p[c]),
                    };
                }
            }
            out.copy_from_slice(&acc);
        } else {
            let mut acc = match op {
                Op::Dilate => [f32::NEG_INFINITY; 4],
                Op::Erode => [f32::INFINITY; 4],
            };
            for &(dx, dy, w) in taps {
                let p = src.pixel_clamped(x + dx, y + dy);
                for c in 0..4 {
                    let v = p[c] as f32 / 255.0;
                    acc[c] = match op {
                        Op::Dilate => acc[c].max(v + w - 1.0),
                        Op::Erode => acc[c].min(v - w + 1.0),
                    };
                }
            }
            for c in 0..4 {
                out[c] = (acc[c].clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_image(width: u32, height: u32, seed: u64) -> PixelBuffer {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..width * height * 4).map(|_| rng.gen()).collect();
        PixelBuffer::from_raw(width, height, data).unwrap()
    }

    fn all_kernels() -> Vec<Kernel> {
        let mut kernels = vec![Kernel::expansion(), Kernel::cross()];
        for i in 1..=CIRCULAR_KERNELS {
            kernels.push(Kernel::circular(i).unwrap());
        }
        kernels
    }

    #[test]
    fn dilate_never_decreases_erode_never_increases() {
        let img = random_image(13, 9, 7);
        for kernel in all_kernels() {
            let dilated = dilate(&img, &kernel, 2);
            let eroded = erode(&img, &kernel, 2);
            for i in 0..img.as_raw().len() {
                assert!(dilated.as_raw()[i] >= img.as_raw()[i]);
                assert!(eroded.as_raw()[i] <= img.as_raw()[i]);
            }
        }
    }

    #[test]
    fn single_bright_pixel_grows_into_kernel_shape() {
        let mut img = PixelBuffer::filled(5, 5, [0, 0, 0, 255]);
        img.put_pixel(2, 2, [200, 100, 50, 255]);

        let square = dilate(&img, &Kernel::expansion(), 1);
        for y in 1..=3 {
            for x in 1..=3 {
                assert_eq!(square.pixel(x, y), [200, 100, 50, 255]);
            }
        }
        assert_eq!(square.pixel(0, 0), [0, 0, 0, 255]);

        let cross = dilate(&img, &Kernel::cross(), 1);
        assert_eq!(cross.pixel(2, 1), [200, 100, 50, 255]);
        assert_eq!(cross.pixel(1, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn erode_removes_isolated_pixel() {
        let mut img = PixelBuffer::filled(4, 4, [10, 10, 10, 255]);
        img.put_pixel(1, 1, [250, 250, 250, 255]);
        let eroded = erode(&img, &Kernel::expansion(), 1);
        assert_eq!(eroded, PixelBuffer::filled(4, 4, [10, 10, 10, 255]));
    }

    #[test]
    fn fractional_kernel_attenuates_far_neighbours() {
        let kernel = Kernel::circular(1).unwrap();
        assert!(!kernel.is_binary());
        assert_eq!(kernel.weight(1, 1), 1.0);
        assert_eq!(kernel.weight(1, 0), 0.5);

        let mut img = PixelBuffer::filled(3, 3, [0, 0, 0, 255]);
        img.put_pixel(1, 1, [255, 255, 255, 255]);
        let out = dilate(&img, &kernel, 1);
        assert_eq!(out.pixel(1, 1), [255, 255, 255, 255]);
        // 1.0 + 0.5 - 1.0 = 0.5
        assert_eq!(out.pixel(1, 0)[0], 128);
        // corner weight is small but positive
        assert!(out.pixel(0, 0)[0] < 30);
    }

    #[test]
    fn zero_iterations_is_identity() {
        let img = random_image(6, 4, 1);
        assert_eq!(dilate(&img, &Kernel::expansion(), 0), img);
        assert_eq!(erode(&img, &Kernel::cross(), 0), img);
    }

    #[test]
    fn parallel_matches_sequential() {
        let img = random_image(17, 11, 3);
        let kernel = Kernel::circular(2).unwrap();
        assert_eq!(
            dilate_with(&img, &kernel, 3, Execution::Parallel),
            dilate(&img, &kernel, 3)
        );
        assert_eq!(
            erode_with(&img, &Kernel::cross(), 2, Execution::Parallel),
            erode(&img, &Kernel::cross(), 2)
        );
    }

    #[test]
    fn opening_and_closing_reach_fixed_point() {
        let img = random_image(12, 12, 11);
        for kernel in [Kernel::expansion(), Kernel::cross()] {
            for op in [opening, closing] {
                let mut current = op(&img, &kernel, 1);
                let mut stable = false;
                for _ in 0..20 {
                    let next = op(&current, &kernel, 1);
                    if next == current {
                        stable = true;
                        break;
                    }
                    current = next;
                }
                assert!(stable);
            }
        }
    }

    #[test]
    fn unknown_kernel_index_is_error() {
        assert_eq!(Kernel::circular(0), Err(PixelizeError::UnknownKernel(0)));
        assert_eq!(Kernel::circular(7), Err(PixelizeError::UnknownKernel(7)));
        assert_eq!(Kernel::circular(6).unwrap().size(), 13);
    }

    #[test]
    fn kernel_validation() {
        assert!(Kernel::new(2, vec![1.0; 4]).is_err());
        assert!(Kernel::new(3, vec![1.0; 8]).is_err());
        assert!(Kernel::new(3, vec![0.0; 9]).is_err());
        assert!(Kernel::new(1, vec![1.5]).is_err());
        assert!(Kernel::new(1, vec![1.0]).unwrap().is_binary());
    }
}
