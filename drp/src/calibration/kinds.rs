use serde::Deserialize;

use crate::error::Result;
use crate::image::Image;
use crate::metadata::{EXPTIME_KEY, FILTER_KEY};

/// Numerics of one calibration type; the caching logic is shared.
pub trait CalibrationKind {
    /// Artifact file name prefix, e.g. `master_flat`.
    fn base_name(&self) -> &str;

    /// Value of `OBSTYPE` selected as candidates by default.
    fn category(&self) -> &str;

    /// Marker appended to `CALSTEPS`, also the provided capability.
    fn step_marker(&self) -> &str;

    /// Metadata keys that determine which artifact applies to a frame.
    fn key_fields(&self) -> &[String];

    fn prepare_candidate(&self, image: Image) -> Result<Image> {
        Ok(image)
    }

    fn correct(&self, image: &Image, master: &Image) -> Result<Image>;
}

/// Pixel window used to normalise flat candidates. Exclusive upper bounds,
/// clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            x_min: 0,
            x_max: usize::MAX,
            y_min: 0,
            y_max: usize::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlatKind {
    region: Region,
    key_fields: Vec<String>,
}

impl Default for FlatKind {
    fn default() -> Self {
        Self::new(Region::default())
    }
}

impl FlatKind {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            key_fields: vec![FILTER_KEY.to_string()],
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }
}

impl CalibrationKind for FlatKind {
    fn base_name(&self) -> &str {
        "master_flat"
    }

    fn category(&self) -> &str {
        "flat"
    }

    fn step_marker(&self) -> &str {
        "flat"
    }

    fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    fn prepare_candidate(&self, image: Image) -> Result<Image> {
        let Region {
            x_min,
            x_max,
            y_min,
            y_max,
        } = self.region;
        let median = image.median_in_region(x_min, x_max, y_min, y_max);
        if !median.is_finite() || median == 0.0 {
            return Err(anyhow::anyhow!(
                "Flat candidate has unusable median {} in region {:?}",
                median,
                self.region
            )
            .into());
        }
        Ok(image.map(|v| v / median))
    }

    fn correct(&self, image: &Image, master: &Image) -> Result<Image> {
        Ok(image.zip_map(master, |v, flat| v / flat)?)
    }
}

#[derive(Debug, Clone)]
pub struct DarkKind {
    key_fields: Vec<String>,
}

impl Default for DarkKind {
    fn default() -> Self {
        Self {
            key_fields: vec![EXPTIME_KEY.to_string()],
        }
    }
}

impl CalibrationKind for DarkKind {
    fn base_name(&self) -> &str {
        "master_dark"
    }

    fn category(&self) -> &str {
        "dark"
    }

    fn step_marker(&self) -> &str {
        "dark"
    }

    fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    fn correct(&self, image: &Image, master: &Image) -> Result<Image> {
        Ok(image.zip_map(master, |v, dark| v - dark)?)
    }
}

fn default_cache_sub_dir() -> String {
    "calibration".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DarkParams {
    #[serde(default = "default_cache_sub_dir")]
    pub cache_sub_dir: String,
    #[serde(default)]
    pub nan_threshold: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlatParams {
    #[serde(default = "default_cache_sub_dir")]
    pub cache_sub_dir: String,
    #[serde(default)]
    pub nan_threshold: Option<f32>,
    #[serde(default)]
    pub x_min: usize,
    #[serde(default = "unbounded")]
    pub x_max: usize,
    #[serde(default)]
    pub y_min: usize,
    #[serde(default = "unbounded")]
    pub y_max: usize,
}

fn unbounded() -> usize {
    usize::MAX
}

impl FlatParams {
    pub fn region(&self) -> Region {
        Region {
            x_min: self.x_min,
            x_max: self.x_max,
            y_min: self.y_min,
            y_max: self.y_max,
        }
    }
}
