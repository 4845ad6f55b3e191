//! Acquisition loading.
//!
//! An [`Acquisition`] is the in-memory form of one microscope record: raw
//! samples, the per-axis pixel size and whatever native metadata the file
//! carried. The [`ser`] module reads TIA series (`.ser`) files.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde_json::Value;

use crate::core::metadata::PixelSize;

pub mod ser;

pub use ser::read_ser_file;

/// One loaded acquisition record.
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// Acquisition-native fields
    pub metadata: BTreeMap<String, Value>,
    /// Raw samples, rows first
    pub data: Array2<f64>,
    /// Physical pixel size (meters)
    pub pixel_size: PixelSize,
}

impl Acquisition {
    /// Image width in pixels
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Image height in pixels
    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}
