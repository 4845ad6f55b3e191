//! Records passed between pipeline stages.
//!
//! [`InputFile`] flows from discovery into the exporter, [`ExportMetadata`]
//! flows from every exporter invocation into the aggregator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::errors::{Result, SerStitchError};

/// Meters to micrometers.
pub const METERS_TO_MICROMETERS: f64 = 1.0e6;

/// Native metadata key holding the stage X position (meters).
pub const STAGE_X_KEY: &str = "stage_x";

/// Native metadata key holding the stage Y position (meters).
pub const STAGE_Y_KEY: &str = "stage_y";

/// Plausible pixel sizes for electron and light microscopy, in micrometers.
const PLAUSIBLE_PIXEL_SIZE_UM: std::ops::RangeInclusive<f64> = 1.0e-6..=1.0e3;

/// One acquisition file selected by discovery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InputFile {
    path: PathBuf,
}

impl InputFile {
    /// Wrap a discovered path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the acquisition file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base name without extension, used to name every derived output
    pub fn stem(&self) -> Result<String> {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SerStitchError::load(&self.path, "file name has no usable stem"))
    }
}

impl From<PathBuf> for InputFile {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

/// Physical size of one pixel, per axis, in the acquisition's base unit (meters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct PixelSize {
    components: Vec<f64>,
}

impl PixelSize {
    /// Build a 2- or 3-component pixel size
    pub fn new(components: Vec<f64>) -> Result<Self> {
        if !(2..=3).contains(&components.len()) {
            return Err(SerStitchError::validation(format!(
                "pixel size needs 2 or 3 components, got {}",
                components.len()
            )));
        }
        Ok(Self { components })
    }

    /// Per-axis sizes
    pub fn components(&self) -> &[f64] {
        &self.components
    }

    /// Size along the first axis
    pub fn x(&self) -> f64 {
        self.components[0]
    }

    /// First-axis size converted from meters to micrometers.
    ///
    /// Non-finite or non-positive sizes are rejected. Sizes far outside the
    /// microscopy range are returned but logged, since they usually mean the
    /// file stores a unit other than meters.
    pub fn to_micrometers(&self) -> Result<f64> {
        let meters = self.x();
        if !meters.is_finite() || meters <= 0.0 {
            return Err(SerStitchError::validation(format!(
                "pixel size must be a positive finite length, got {meters}"
            )));
        }
        let micrometers = meters * METERS_TO_MICROMETERS;
        if !PLAUSIBLE_PIXEL_SIZE_UM.contains(&micrometers) {
            warn!(
                "Pixel size {micrometers} um is outside the expected range; check that the acquisition stores meters"
            );
        }
        Ok(micrometers)
    }
}

impl TryFrom<Vec<f64>> for PixelSize {
    type Error = SerStitchError;

    fn try_from(components: Vec<f64>) -> Result<Self> {
        Self::new(components)
    }
}

impl From<PixelSize> for Vec<f64> {
    fn from(size: PixelSize) -> Self {
        size.components
    }
}

/// Record describing what one exporter invocation wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// Acquisition file the record was derived from
    pub source_file: PathBuf,
    /// Tile file name, identical in every prefix directory
    pub image_file_name: String,
    /// First-axis pixel size in micrometers
    pub pixel_size: f64,
    /// Pixel size as stored by the acquisition (meters)
    pub pixel_size_native: PixelSize,
    /// Acquisition-native fields
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl ExportMetadata {
    /// Numeric native field
    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Stage position in meters, if the acquisition recorded one
    pub fn stage_position(&self) -> Option<(f64, f64)> {
        Some((self.field_f64(STAGE_X_KEY)?, self.field_f64(STAGE_Y_KEY)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_stem_drops_extension() {
        let file = InputFile::new("/data/run_01/a.ser");
        assert_eq!(file.stem().unwrap(), "a");
    }

    #[test]
    fn test_pixel_size_component_count() {
        assert!(PixelSize::new(vec![1.0e-9]).is_err());
        assert!(PixelSize::new(vec![1.0e-9, 1.0e-9]).is_ok());
        assert!(PixelSize::new(vec![1.0e-9, 1.0e-9, 2.0e-9]).is_ok());
        assert!(PixelSize::new(vec![1.0; 4]).is_err());
    }

    #[test]
    fn test_pixel_size_converts_meters_to_micrometers() {
        let size = PixelSize::new(vec![2.5e-9, 2.5e-9]).unwrap();
        assert_relative_eq!(size.to_micrometers().unwrap(), 2.5e-3, max_relative = 1e-12);
    }

    #[test]
    fn test_pixel_size_rejects_non_positive() {
        let size = PixelSize::new(vec![0.0, 1.0e-9]).unwrap();
        assert!(size.to_micrometers().is_err());
        let size = PixelSize::new(vec![f64::NAN, 1.0e-9]).unwrap();
        assert!(size.to_micrometers().is_err());
    }

    #[test]
    fn test_metadata_flattens_native_fields() {
        let mut fields = BTreeMap::new();
        fields.insert(STAGE_X_KEY.to_string(), json!(1.0e-6));
        fields.insert(STAGE_Y_KEY.to_string(), json!(-2.0e-6));
        let record = ExportMetadata {
            source_file: PathBuf::from("a.ser"),
            image_file_name: "a.tif".to_string(),
            pixel_size: 0.01,
            pixel_size_native: PixelSize::new(vec![1.0e-8, 1.0e-8]).unwrap(),
            fields,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["image_file_name"], json!("a.tif"));
        assert_eq!(value["stage_x"], json!(1.0e-6));
        assert_eq!(record.stage_position(), Some((1.0e-6, -2.0e-6)));

        let back: ExportMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
