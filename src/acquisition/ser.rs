//! Reader for TIA series (`.ser`) files.
//!
//! Only what the export pipeline needs is decoded: the first 2-D data element,
//! its calibration, and the tag carrying acquisition time and (optionally) the
//! stage position.
//!
//! # Layout
//!
//! All values are little-endian.
//!
//! - **Header**: byte order (`0x4949`), series id (`0x0197`), version
//!   (`0x0210` uses 32-bit offsets, `0x0220` uses 64-bit offsets), data type id,
//!   tag type id, total and valid element counts, offset-array offset and the
//!   number of dimensions.
//! - **Offset arrays**: `total` data-element offsets followed by `total`
//!   tag offsets.
//! - **2-D data element**: X and Y calibration (offset, delta, element), the
//!   sample type code, array width and height, then the samples row by row.
//! - **Tag**: tag type, two reserved bytes, acquisition time (seconds since
//!   the Unix epoch), then stage X and Y in meters for position tags.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::DateTime;
use ndarray::Array2;
use serde_json::{json, Value};
use tracing::debug;

use super::Acquisition;
use crate::core::errors::{Result, SerStitchError};
use crate::core::metadata::{PixelSize, STAGE_X_KEY, STAGE_Y_KEY};

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const SERIES_ID: u16 = 0x0197;
const VERSION_32BIT_OFFSETS: u16 = 0x0210;
const VERSION_64BIT_OFFSETS: u16 = 0x0220;

const DATA_TYPE_1D: u32 = 0x4120;
const DATA_TYPE_2D: u32 = 0x4122;

const TAG_TIME_ONLY: u32 = 0x4152;
const TAG_TIME_AND_POSITION: u32 = 0x4142;

/// Sample encodings of a 2-D data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleType {
    fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::U8,
            2 => Self::U16,
            3 => Self::U32,
            4 => Self::I8,
            5 => Self::I16,
            6 => Self::I32,
            7 => Self::F32,
            8 => Self::F64,
            _ => return None,
        })
    }

    fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            Self::U8 => f64::from(bytes[0]),
            Self::I8 => f64::from(bytes[0] as i8),
            Self::U16 => f64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            Self::I16 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            Self::U32 => f64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Self::I32 => f64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Self::F32 => f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Self::F64 => f64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
        }
    }
}

/// Bounds-checked little-endian cursor over the file contents.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], path: &'a Path) -> Self {
        Self { bytes, pos: 0, path }
    }

    fn corrupt(&self, message: impl Into<String>) -> SerStitchError {
        SerStitchError::load(self.path, message)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = usize::try_from(offset)
            .ok()
            .filter(|&offset| offset <= self.bytes.len())
            .ok_or_else(|| {
                self.corrupt(format!(
                    "offset {offset} points past the end of the file ({} bytes)",
                    self.bytes.len()
                ))
            })?;
        self.pos = offset;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                self.corrupt(format!(
                    "unexpected end of file reading {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn offset(&mut self, wide: bool) -> Result<u64> {
        let raw = if wide { self.i64()? } else { i64::from(self.i32()?) };
        u64::try_from(raw).map_err(|_| self.corrupt(format!("negative offset {raw}")))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let raw = self.i32()?;
        usize::try_from(raw).map_err(|_| self.corrupt(format!("negative {what} {raw}")))
    }
}

/// Series header fields needed to locate the first element.
struct SeriesHeader {
    version: u16,
    tag_type: u32,
    total_elements: usize,
    valid_elements: usize,
    offset_array_offset: u64,
}

impl SeriesHeader {
    fn wide_offsets(&self) -> bool {
        self.version == VERSION_64BIT_OFFSETS
    }
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<SeriesHeader> {
    let byte_order = cursor.u16()?;
    if byte_order != BYTE_ORDER_LITTLE_ENDIAN {
        return Err(cursor.corrupt(format!("unsupported byte order 0x{byte_order:04x}")));
    }
    let series_id = cursor.u16()?;
    if series_id != SERIES_ID {
        return Err(cursor.corrupt(format!("not a TIA series file (id 0x{series_id:04x})")));
    }
    let version = cursor.u16()?;
    if version != VERSION_32BIT_OFFSETS && version != VERSION_64BIT_OFFSETS {
        return Err(cursor.corrupt(format!("unsupported series version 0x{version:04x}")));
    }

    let data_type = cursor.u32()?;
    match data_type {
        DATA_TYPE_2D => {}
        DATA_TYPE_1D => return Err(cursor.corrupt("1-D spectrum series cannot be exported as tiles")),
        other => return Err(cursor.corrupt(format!("unknown data type id 0x{other:04x}"))),
    }

    let tag_type = cursor.u32()?;
    if tag_type != TAG_TIME_ONLY && tag_type != TAG_TIME_AND_POSITION {
        return Err(cursor.corrupt(format!("unknown tag type id 0x{tag_type:04x}")));
    }

    let total_elements = cursor.count("element count")?;
    let valid_elements = cursor.count("valid element count")?;
    let wide = version == VERSION_64BIT_OFFSETS;
    let offset_array_offset = cursor.offset(wide)?;

    Ok(SeriesHeader {
        version,
        tag_type,
        total_elements,
        valid_elements,
        offset_array_offset,
    })
}

/// Read the first image of a TIA series file.
pub fn read_ser_file(path: &Path) -> Result<Acquisition> {
    let bytes = std::fs::read(path)
        .map_err(|e| SerStitchError::load(path, format!("cannot read file: {e}")))?;
    parse_ser(&bytes, path)
}

fn parse_ser(bytes: &[u8], path: &Path) -> Result<Acquisition> {
    let mut cursor = Cursor::new(bytes, path);
    let header = read_header(&mut cursor)?;

    if header.valid_elements == 0 || header.total_elements == 0 {
        return Err(cursor.corrupt("series contains no data elements"));
    }
    if header.valid_elements > header.total_elements {
        return Err(cursor.corrupt(format!(
            "valid element count {} exceeds total {}",
            header.valid_elements, header.total_elements
        )));
    }

    let wide = header.wide_offsets();
    let offset_width: u64 = if wide { 8 } else { 4 };
    cursor.seek(header.offset_array_offset)?;
    let data_offset = cursor.offset(wide)?;
    let tag_array_offset =
        header.offset_array_offset + offset_width * header.total_elements as u64;
    cursor.seek(tag_array_offset)?;
    let tag_offset = cursor.offset(wide)?;

    // Data element
    cursor.seek(data_offset)?;
    let calibration_offset_x = cursor.f64()?;
    let calibration_delta_x = cursor.f64()?;
    let _calibration_element_x = cursor.i32()?;
    let calibration_offset_y = cursor.f64()?;
    let calibration_delta_y = cursor.f64()?;
    let _calibration_element_y = cursor.i32()?;
    let type_code = cursor.u16()?;
    let sample_type = SampleType::from_code(type_code)
        .ok_or_else(|| cursor.corrupt(format!("unsupported sample type code {type_code}")))?;
    let width = cursor.count("array width")?;
    let height = cursor.count("array height")?;
    if width == 0 || height == 0 {
        return Err(cursor.corrupt(format!("empty image {width}x{height}")));
    }

    let sample_bytes = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(sample_type.width()))
        .ok_or_else(|| cursor.corrupt("image dimensions overflow"))?;
    let raw = cursor.take(sample_bytes)?;
    let samples: Vec<f64> = raw
        .chunks_exact(sample_type.width())
        .map(|chunk| sample_type.decode(chunk))
        .collect();
    let data = Array2::from_shape_vec((height, width), samples)
        .map_err(|e| cursor.corrupt(format!("sample array shape mismatch: {e}")))?;

    // Tag
    cursor.seek(tag_offset)?;
    let element_tag = u32::from(cursor.u16()?);
    let _reserved = cursor.u16()?;
    let acquisition_time = cursor.u32()?;
    let stage = if header.tag_type == TAG_TIME_AND_POSITION && element_tag == TAG_TIME_AND_POSITION {
        Some((cursor.f64()?, cursor.f64()?))
    } else {
        None
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("series_version".to_string(), json!(header.version));
    metadata.insert("element_count".to_string(), json!(header.valid_elements));
    metadata.insert("data_type".to_string(), json!(sample_type.name()));
    metadata.insert("width".to_string(), json!(width));
    metadata.insert("height".to_string(), json!(height));
    metadata.insert("calibration_offset_x".to_string(), json!(calibration_offset_x));
    metadata.insert("calibration_offset_y".to_string(), json!(calibration_offset_y));
    metadata.insert("acquisition_time".to_string(), json!(acquisition_time));
    if let Some(timestamp) = DateTime::from_timestamp(i64::from(acquisition_time), 0) {
        metadata.insert(
            "acquisition_timestamp".to_string(),
            Value::String(timestamp.to_rfc3339()),
        );
    }
    if let Some((x, y)) = stage {
        metadata.insert(STAGE_X_KEY.to_string(), json!(x));
        metadata.insert(STAGE_Y_KEY.to_string(), json!(y));
    }

    let pixel_size = PixelSize::new(vec![calibration_delta_x, calibration_delta_y])
        .map_err(|e| cursor.corrupt(e.to_string()))?;

    debug!(
        "Read {} ({}x{} {}, stage position: {})",
        path.display(),
        width,
        height,
        sample_type.name(),
        stage.is_some()
    );

    Ok(Acquisition {
        metadata,
        data,
        pixel_size,
    })
}

#[cfg(test)]
#[path = "ser_tests.rs"]
mod tests;
