//! Tile quantization and TIFF encoding.

use std::num::NonZeroU32;
use std::path::Path;

use image::{ImageBuffer, ImageFormat, Luma};
use ndarray::Array2;

use super::persistence::write_atomic;
use crate::core::errors::{Result, SerStitchError};

/// Clip a raw sample to the 16-bit range.
pub fn quantize_u16(value: f64) -> u16 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, f64::from(u16::MAX)).round() as u16
}

/// Map a raw sample from `[0, intensity_range]` onto `[0, 255]`.
///
/// Samples outside the window are clipped first, so the boundary value lands
/// exactly in the top bin and no input can exceed 255.
pub fn normalize_u8(value: f64, intensity_range: NonZeroU32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    let range = f64::from(intensity_range.get());
    let scaled = value.clamp(0.0, range) / range * f64::from(u8::MAX);
    scaled.round().clamp(0.0, f64::from(u8::MAX)) as u8
}

/// 16-bit representation of raw samples, row major.
pub fn to_u16_samples(data: &Array2<f64>) -> Vec<u16> {
    data.iter().copied().map(quantize_u16).collect()
}

/// Normalized 8-bit representation of raw samples, row major.
pub fn to_u8_samples(data: &Array2<f64>, intensity_range: NonZeroU32) -> Vec<u8> {
    data.iter()
        .map(|&value| normalize_u8(value, intensity_range))
        .collect()
}

fn dimensions(data: &Array2<f64>, path: &Path) -> Result<(u32, u32)> {
    let width = u32::try_from(data.ncols());
    let height = u32::try_from(data.nrows());
    match (width, height) {
        (Ok(width), Ok(height)) => Ok((width, height)),
        _ => Err(SerStitchError::Write {
            path: path.to_path_buf(),
            message: format!("image {}x{} exceeds TIFF limits", data.ncols(), data.nrows()),
            source: None,
        }),
    }
}

/// Encode raw samples as a 16-bit grayscale TIFF at `path`.
pub fn write_u16_tiff(data: &Array2<f64>, path: &Path) -> Result<()> {
    let (width, height) = dimensions(data, path)?;
    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(width, height, to_u16_samples(data))
            .ok_or_else(|| SerStitchError::internal("16-bit buffer size mismatch"))?;
    write_atomic(path, |file| {
        buffer
            .write_to(file, ImageFormat::Tiff)
            .map_err(|e| SerStitchError::write(path, "cannot encode 16-bit TIFF", e))
    })
}

/// Encode normalized samples as an 8-bit grayscale TIFF at `path`.
pub fn write_u8_tiff(data: &Array2<f64>, intensity_range: NonZeroU32, path: &Path) -> Result<()> {
    let (width, height) = dimensions(data, path)?;
    let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width, height, to_u8_samples(data, intensity_range))
            .ok_or_else(|| SerStitchError::internal("8-bit buffer size mismatch"))?;
    write_atomic(path, |file| {
        buffer
            .write_to(file, ImageFormat::Tiff)
            .map_err(|e| SerStitchError::write(path, "cannot encode 8-bit TIFF", e))
    })
}
