use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

use crate::error::PixelizeError;

/// Owned row-major RGBA8 raster with unpremultiplied alpha.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Transparent black buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self { width, height, data }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, PixelizeError> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(PixelizeError::DimensionMismatch {
                len: data.len(),
                width,
                height,
            });
        }
        Ok(Self { width, height, data })
    }

    /// Builds a buffer from RGB triples, alpha set to opaque.
    pub fn from_rgb(width: u32, height: u32, pixels: &[[u8; 3]]) -> Result<Self, PixelizeError> {
        let data = pixels
            .iter()
            .flat_map(|&[r, g, b]| [r, g, b, 255])
            .collect();
        Self::from_raw(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn ensure_non_empty(&self) -> Result<(), PixelizeError> {
        if self.is_empty() {
            return Err(PixelizeError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Pixel at signed coordinates, clamped to the nearest edge.
    #[inline]
    pub fn pixel_clamped(&self, x: i64, y: i64) -> [u8; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.pixel(x, y)
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&pixel);
    }

    /// All pixels as RGB triples in raster order.
    pub fn rgb_pixels(&self) -> Vec<[u8; 3]> {
        self.data
            .chunks_exact(4)
            .map(|p| [p[0], p[1], p[2]])
            .collect()
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| Rgba(self.pixel(x, y)))
    }

    /// Resamples to exactly `width`x`height` with a standard filter.
    pub fn resize(&self, width: u32, height: u32, filter: FilterType) -> Self {
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        let resized = imageops::resize(&self.to_rgba_image(), width, height, filter);
        Self::from(resized)
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }
}

impl From<&DynamicImage> for PixelBuffer {
    fn from(img: &DynamicImage) -> Self {
        Self::from(img.to_rgba8())
    }
}

impl From<PixelBuffer> for DynamicImage {
    fn from(buffer: PixelBuffer) -> Self {
        DynamicImage::ImageRgba8(buffer.to_rgba_image())
    }
}

/// One weight in [0, 1] per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl WeightMap {
    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Result<Self, PixelizeError> {
        if values.len() != width as usize * height as usize {
            return Err(PixelizeError::DimensionMismatch {
                len: values.len(),
                width,
                height,
            });
        }
        Ok(Self {
            width,
            height,
            values: values.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// Nearest-neighbour resample, used when the image was downscaled after
    /// the weights were computed.
    pub fn resize_nearest(&self, width: u32, height: u32) -> Self {
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        let mut values = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let sy = ((y as u64 * self.height as u64) / height.max(1) as u64) as u32;
            for x in 0..width {
                let sx = ((x as u64 * self.width as u64) / width.max(1) as u64) as u32;
                values.push(self.get(sx, sy));
            }
        }
        Self {
            width,
            height,
            values,
        }
    }

    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([(self.get(x, y) * 255.0).round() as u8])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_checks_length() {
        let err = PixelBuffer::from_raw(2, 2, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            PixelizeError::DimensionMismatch {
                len: 15,
                width: 2,
                height: 2
            }
        );
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn clamped_sampling_replicates_edges() {
        let mut buf = PixelBuffer::new(3, 2);
        buf.put_pixel(0, 0, [1, 2, 3, 4]);
        buf.put_pixel(2, 1, [9, 9, 9, 9]);
        assert_eq!(buf.pixel_clamped(-5, -1), [1, 2, 3, 4]);
        assert_eq!(buf.pixel_clamped(10, 7), [9, 9, 9, 9]);
    }

    #[test]
    fn rgba_image_round_trip() {
        let buf = PixelBuffer::from_rgb(2, 1, &[[10, 20, 30], [40, 50, 60]]).unwrap();
        let back = PixelBuffer::from(buf.to_rgba_image());
        assert_eq!(back, buf);
    }

    #[test]
    fn nearest_resize_of_uniform_stays_uniform() {
        let buf = PixelBuffer::filled(7, 5, [12, 34, 56, 255]);
        let small = buf.resize(3, 2, FilterType::Nearest);
        assert_eq!(small, PixelBuffer::filled(3, 2, [12, 34, 56, 255]));
    }

    #[test]
    fn weight_map_resize_picks_block_values() {
        let map = WeightMap::from_values(2, 1, vec![0.0, 1.0]).unwrap();
        let wide = map.resize_nearest(4, 2);
        assert_eq!(wide.values(), &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn weight_map_clamps_values() {
        let map = WeightMap::from_values(2, 1, vec![-0.5, 1.5]).unwrap();
        assert_eq!(map.values(), &[0.0, 1.0]);
    }
}
