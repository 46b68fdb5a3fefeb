use anyhow::{ensure, Result};

use crate::image::Image;
use crate::math::nan_median_f32;

/// Pixelwise median of a stack, ignoring NaN. A pixel that is NaN in every
/// frame stays NaN.
pub fn median_combine(images: &[Image]) -> Result<Image> {
    ensure!(!images.is_empty(), "Must provide at least one frame to combine");

    let dims = images[0].dimensions();
    for (i, image) in images.iter().enumerate().skip(1) {
        ensure!(
            image.dimensions() == dims,
            "Frame {} has different dimensions: {:?} vs {:?}",
            i,
            image.dimensions(),
            dims
        );
    }

    let mut values = Vec::with_capacity(images.len());
    let pixels = (0..dims.pixel_count())
        .map(|pixel_idx| {
            values.clear();
            values.extend(images.iter().map(|image| image.pixels()[pixel_idx]));
            nan_median_f32(&mut values)
        })
        .collect();

    Ok(Image::from_pixels(dims, pixels))
}
