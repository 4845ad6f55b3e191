//! Tile-position manifest (`TileConfiguration.txt`).
//!
//! The format is the one read by Fiji's Grid/Collection stitching plugin:
//!
//! ```text
//! # Define the number of dimensions we are working on
//! dim = 2
//!
//! # Define the image coordinates
//! a.tif; ; (1523.000, -88.500)
//! ```
//!
//! Coordinates are in pixels of the exported tiles.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::persistence::write_text_atomic;
use crate::core::errors::{Result, SerStitchError};
use crate::core::metadata::{ExportMetadata, METERS_TO_MICROMETERS};

const DIMENSIONS_COMMENT: &str = "# Define the number of dimensions we are working on";
const COORDINATES_COMMENT: &str = "# Define the image coordinates";

/// Relative tolerance when comparing pixel sizes of different tiles.
const PIXEL_SIZE_TOLERANCE: f64 = 1.0e-6;

/// Placement of one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Tile file name relative to the manifest's directory
    pub image_file_name: String,
    /// Placement in pixels, one value per dimension
    pub position: Vec<f64>,
}

/// Parsed or to-be-written manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileManifest {
    /// Number of spatial dimensions
    pub dimensions: usize,
    /// Rows in file order
    pub entries: Vec<ManifestEntry>,
}

impl TileManifest {
    /// Manifest without rows
    pub fn empty() -> Self {
        Self {
            dimensions: 2,
            entries: Vec::new(),
        }
    }

    /// Derive tile placements from export records, keeping record order.
    ///
    /// Each stage position (meters) is converted to micrometers and divided by
    /// the record's pixel size (micrometers), giving a position in pixels.
    pub fn from_records(records: &[ExportMetadata]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut reference_pixel_size: Option<f64> = None;
        let mut entries = Vec::with_capacity(records.len());

        for record in records {
            let name = &record.image_file_name;
            if !seen.insert(name.as_str()) {
                return Err(SerStitchError::aggregation_record(
                    "duplicate tile name in export records",
                    name,
                ));
            }
            if !record.pixel_size.is_finite() || record.pixel_size <= 0.0 {
                return Err(SerStitchError::aggregation_record(
                    format!("invalid pixel size {}", record.pixel_size),
                    name,
                ));
            }
            match reference_pixel_size {
                None => reference_pixel_size = Some(record.pixel_size),
                Some(reference) => {
                    let deviation = (record.pixel_size - reference).abs() / reference;
                    if deviation > PIXEL_SIZE_TOLERANCE {
                        return Err(SerStitchError::aggregation_record(
                            format!(
                                "pixel size {} um differs from {} um of the first tile",
                                record.pixel_size, reference
                            ),
                            name,
                        ));
                    }
                }
            }
            let (stage_x, stage_y) = record.stage_position().ok_or_else(|| {
                SerStitchError::aggregation_record(
                    "record has no stage position to place the tile",
                    name,
                )
            })?;

            entries.push(ManifestEntry {
                image_file_name: name.clone(),
                position: vec![
                    stage_x * METERS_TO_MICROMETERS / record.pixel_size,
                    stage_y * METERS_TO_MICROMETERS / record.pixel_size,
                ],
            });
        }

        Ok(Self {
            dimensions: 2,
            entries,
        })
    }

    /// Render with a fixed number of decimals.
    pub fn render(&self, precision: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{DIMENSIONS_COMMENT}");
        let _ = writeln!(out, "dim = {}", self.dimensions);
        let _ = writeln!(out);
        let _ = writeln!(out, "{COORDINATES_COMMENT}");
        for entry in &self.entries {
            let coordinates: Vec<String> = entry
                .position
                .iter()
                .map(|&value| format!("{:.precision$}", canonical(value, precision)))
                .collect();
            let _ = writeln!(out, "{}; ; ({})", entry.image_file_name, coordinates.join(", "));
        }
        out
    }

    /// Parse manifest text. Malformed content is a stitch error.
    pub fn parse(text: &str) -> Result<Self> {
        let mut dimensions: Option<usize> = None;
        let mut entries = Vec::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            let line_no = index + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(value) = line.strip_prefix("dim") {
                let value = value.trim_start().strip_prefix('=').ok_or_else(|| {
                    SerStitchError::stitch(format!("line {line_no}: expected 'dim = <n>'"))
                })?;
                let parsed = value.trim().parse::<usize>().map_err(|e| {
                    SerStitchError::stitch(format!("line {line_no}: invalid dimension count: {e}"))
                })?;
                if !(2..=3).contains(&parsed) {
                    return Err(SerStitchError::stitch(format!(
                        "line {line_no}: unsupported dimension count {parsed}"
                    )));
                }
                dimensions = Some(parsed);
                continue;
            }

            let dims = dimensions.ok_or_else(|| {
                SerStitchError::stitch(format!("line {line_no}: tile row before 'dim' declaration"))
            })?;
            entries.push(parse_row(line, line_no, dims)?);
        }

        let dimensions = dimensions
            .ok_or_else(|| SerStitchError::stitch("manifest has no 'dim' declaration"))?;
        Ok(Self {
            dimensions,
            entries,
        })
    }

    /// Read and parse a manifest file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SerStitchError::stitch_path(format!("cannot read manifest: {e}"), path)
        })?;
        Self::parse(&text).map_err(|e| match e {
            SerStitchError::Stitch { message, .. } => SerStitchError::stitch_path(message, path),
            other => other,
        })
    }
}

/// Round to the printed precision and fold negative zero.
fn canonical(value: f64, precision: usize) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor + 0.0
}

fn parse_row(line: &str, line_no: usize, dimensions: usize) -> Result<ManifestEntry> {
    let malformed = |what: &str| SerStitchError::stitch(format!("line {line_no}: {what}: '{line}'"));

    let mut parts = line.splitn(3, ';');
    let name = parts.next().map(str::trim).unwrap_or_default();
    let _series = parts.next();
    let coordinates = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| malformed("expected 'name; ; (x, y)'"))?;
    if name.is_empty() {
        return Err(malformed("empty tile name"));
    }

    let inner = coordinates
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| malformed("coordinates must be parenthesized"))?;
    let position = inner
        .split(',')
        .map(|value| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| malformed("invalid coordinate"))
        })
        .collect::<Result<Vec<f64>>>()?;
    if position.len() != dimensions {
        return Err(malformed(&format!(
            "expected {dimensions} coordinates, found {}",
            position.len()
        )));
    }

    Ok(ManifestEntry {
        image_file_name: name.to_string(),
        position,
    })
}

/// Write one manifest per prefix directory under `save_dir`.
///
/// Every referenced tile must already exist in each prefix directory; a record
/// pointing at a missing tile fails the whole aggregation before anything is
/// written.
pub fn write_manifests(
    records: &[ExportMetadata],
    save_dir: &Path,
    prefixes: &[String],
    filename: &str,
    precision: usize,
) -> Result<Vec<PathBuf>> {
    let manifest = TileManifest::from_records(records)?;

    for prefix in prefixes {
        let prefix_dir = save_dir.join(prefix);
        for entry in &manifest.entries {
            let tile = prefix_dir.join(&entry.image_file_name);
            if !tile.is_file() {
                return Err(SerStitchError::aggregation_record(
                    format!("tile missing from '{}'", prefix_dir.display()),
                    &entry.image_file_name,
                ));
            }
        }
    }

    let rendered = manifest.render(precision);
    let mut written = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        let path = save_dir.join(prefix).join(filename);
        write_text_atomic(&path, &rendered)?;
        debug!("Wrote manifest {} ({} rows)", path.display(), manifest.entries.len());
        written.push(path);
    }

    info!(
        "Wrote {} manifest(s) with {} tile(s) each",
        written.len(),
        manifest.entries.len()
    );
    Ok(written)
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
