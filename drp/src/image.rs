use std::sync::Arc;

use anyhow::ensure;
use serde::{Deserialize, Serialize};

use crate::math::nan_median_f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl ImageDimensions {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height * self.channels
    }
}

/// Row-major, channel-interleaved `f32` detector image.
///
/// Pixel storage is shared between clones; `pixels_mut` copies it first if
/// another clone still holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    dimensions: ImageDimensions,
    pixels: Arc<Vec<f32>>,
}

impl Image {
    /// # Panics
    /// Panics if `pixels.len()` does not match the dimensions.
    pub fn from_pixels(dimensions: ImageDimensions, pixels: Vec<f32>) -> Self {
        assert_eq!(
            pixels.len(),
            dimensions.pixel_count(),
            "Pixel count mismatch for {:?}",
            dimensions
        );
        Self {
            dimensions,
            pixels: Arc::new(pixels),
        }
    }

    pub fn try_from_pixels(dimensions: ImageDimensions, pixels: Vec<f32>) -> anyhow::Result<Self> {
        ensure!(
            pixels.len() == dimensions.pixel_count(),
            "Pixel count mismatch: {:?} needs {} pixels, got {}",
            dimensions,
            dimensions.pixel_count(),
            pixels.len()
        );
        Ok(Self::from_pixels(dimensions, pixels))
    }

    pub fn filled(dimensions: ImageDimensions, value: f32) -> Self {
        Self::from_pixels(dimensions, vec![value; dimensions.pixel_count()])
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn width(&self) -> usize {
        self.dimensions.width
    }

    pub fn height(&self) -> usize {
        self.dimensions.height
    }

    pub fn channels(&self) -> usize {
        self.dimensions.channels
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.pixels).as_mut_slice()
    }

    /// NaN-ignoring median over `x_min..x_max`, `y_min..y_max`, clamped to
    /// the image bounds.
    pub fn median_in_region(&self, x_min: usize, x_max: usize, y_min: usize, y_max: usize) -> f32 {
        let x_max = x_max.min(self.width());
        let y_max = y_max.min(self.height());
        let channels = self.channels();

        let mut values = Vec::new();
        for y in y_min..y_max {
            let row = y * self.width();
            for x in x_min..x_max {
                let idx = (row + x) * channels;
                values.extend_from_slice(&self.pixels[idx..idx + channels]);
            }
        }

        nan_median_f32(&mut values)
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Image {
        let pixels = self.pixels.iter().map(|&v| f(v)).collect();
        Image::from_pixels(self.dimensions, pixels)
    }

    /// Elementwise combination with an image of the same dimensions.
    pub fn zip_map(&self, other: &Image, f: impl Fn(f32, f32) -> f32) -> anyhow::Result<Image> {
        ensure!(
            self.dimensions == other.dimensions,
            "Dimension mismatch: {:?} vs {:?}",
            self.dimensions,
            other.dimensions
        );
        let pixels = self
            .pixels
            .iter()
            .zip(other.pixels.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Image::from_pixels(self.dimensions, pixels))
    }
}
