//! Shared fixtures: tiny TIA series files written from scratch.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const SERIES_ID: u16 = 0x0197;
const VERSION_32BIT_OFFSETS: u16 = 0x0210;
const DATA_TYPE_2D: u32 = 0x4122;
const TAG_TIME_AND_POSITION: u32 = 0x4142;
const UINT16_CODE: u16 = 2;

/// Pixel size written into every fixture (meters)
pub const PIXEL_SIZE_M: f64 = 1.0e-9;

/// Tile edge length in pixels
pub const TILE: usize = 8;

/// Encode a single-image uint16 series with a stage position.
pub fn encode_ser(width: usize, height: usize, values: &[u16], stage: (f64, f64)) -> Vec<u8> {
    assert_eq!(values.len(), width * height);
    let mut out = Vec::new();
    out.extend_from_slice(&BYTE_ORDER_LITTLE_ENDIAN.to_le_bytes());
    out.extend_from_slice(&SERIES_ID.to_le_bytes());
    out.extend_from_slice(&VERSION_32BIT_OFFSETS.to_le_bytes());
    out.extend_from_slice(&DATA_TYPE_2D.to_le_bytes());
    out.extend_from_slice(&TAG_TIME_AND_POSITION.to_le_bytes());
    out.extend_from_slice(&1i32.to_le_bytes());
    out.extend_from_slice(&1i32.to_le_bytes());
    let offset_array_field = out.len();
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&1i32.to_le_bytes());

    out.extend_from_slice(&1i32.to_le_bytes());
    out.extend_from_slice(&0f64.to_le_bytes());
    out.extend_from_slice(&1f64.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());

    let offset_array = out.len();
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());

    let data_offset = out.len();
    for _ in 0..2 {
        out.extend_from_slice(&0f64.to_le_bytes());
        out.extend_from_slice(&PIXEL_SIZE_M.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
    }
    out.extend_from_slice(&UINT16_CODE.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }

    let tag_offset = out.len();
    out.extend_from_slice(&(TAG_TIME_AND_POSITION as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1_600_000_000u32.to_le_bytes());
    out.extend_from_slice(&stage.0.to_le_bytes());
    out.extend_from_slice(&stage.1.to_le_bytes());

    let patch = |out: &mut Vec<u8>, at: usize, value: usize| {
        out[at..at + 4].copy_from_slice(&(value as i32).to_le_bytes());
    };
    patch(&mut out, offset_array_field, offset_array);
    patch(&mut out, offset_array, data_offset);
    patch(&mut out, offset_array + 4, tag_offset);
    out
}

/// Write `<stem>.ser` filled with `value`, placed `column` tiles to the right.
pub fn write_tile_ser(dir: &Path, stem: &str, column: usize, value: u16) -> PathBuf {
    let stage_x = (column * TILE) as f64 * PIXEL_SIZE_M;
    let bytes = encode_ser(TILE, TILE, &vec![value; TILE * TILE], (stage_x, 0.0));
    let path = dir.join(format!("{stem}.ser"));
    fs::write(&path, bytes).unwrap();
    path
}

/// Write one tile per stem, left to right, with increasing intensities.
pub fn write_row(dir: &Path, stems: &[&str]) {
    for (column, stem) in stems.iter().enumerate() {
        write_tile_ser(dir, stem, column, 200 * (column as u16 + 1));
    }
}
