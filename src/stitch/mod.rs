//! Placement-only mosaic composition.
//!
//! Tiles are positioned exactly where the manifest says; no feature-based
//! refinement of the placements is attempted. Overlaps are resolved by the
//! configured [`FusionMode`].

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::FusionMode;
use crate::core::errors::{Result, SerStitchError};
use crate::io::manifest::TileManifest;
use crate::io::persistence::write_atomic;

/// The composed output image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchedMosaic {
    /// Where the mosaic was written
    pub path: PathBuf,
    /// Mosaic width in pixels
    pub width: u32,
    /// Mosaic height in pixels
    pub height: u32,
    /// Number of tiles composed
    pub tile_count: usize,
}

/// Compositor settings.
#[derive(Debug, Clone)]
pub struct CompositorOptions {
    /// Overlap handling
    pub fusion: FusionMode,
    /// Upper bound on `width * height`
    pub max_mosaic_pixels: u64,
    /// Mosaic file name inside the tiles directory when no explicit path is given
    pub default_output_filename: String,
}

struct PlacedTile {
    image: GrayImage,
    x: i64,
    y: i64,
}

/// Compose the tiles listed in `tiles_dir/manifest_filename` into one image.
///
/// Fails with a stitch error when the manifest is missing or malformed, when a
/// referenced tile is missing or unreadable, and when the manifest lists no
/// tiles at all.
pub fn stitch_tiles(
    tiles_dir: &Path,
    manifest_filename: &str,
    save_path: Option<&Path>,
    options: &CompositorOptions,
) -> Result<StitchedMosaic> {
    let manifest_path = tiles_dir.join(manifest_filename);
    let manifest = TileManifest::read(&manifest_path)?;

    if manifest.dimensions != 2 {
        return Err(SerStitchError::stitch_path(
            format!("only 2-D manifests can be composed, got dim = {}", manifest.dimensions),
            &manifest_path,
        ));
    }
    if manifest.entries.is_empty() {
        return Err(SerStitchError::stitch_path("no tiles to stitch", &manifest_path));
    }

    let tiles = manifest
        .entries
        .par_iter()
        .map(|entry| -> Result<(GrayImage, f64, f64)> {
            let tile_path = tiles_dir.join(&entry.image_file_name);
            if !tile_path.is_file() {
                return Err(SerStitchError::stitch_path("referenced tile is missing", &tile_path));
            }
            let image = image::open(&tile_path)
                .map_err(|e| SerStitchError::stitch_path(format!("cannot decode tile: {e}"), &tile_path))?
                .into_luma8();
            Ok((image, entry.position[0], entry.position[1]))
        })
        .collect::<Result<Vec<_>>>()?;

    let min_x = tiles.iter().map(|(_, x, _)| *x).fold(f64::INFINITY, f64::min);
    let min_y = tiles.iter().map(|(_, _, y)| *y).fold(f64::INFINITY, f64::min);

    let mut placed = Vec::with_capacity(tiles.len());
    let (mut width, mut height) = (0u64, 0u64);
    for (image, x, y) in tiles {
        let (Some(offset_x), Some(offset_y)) = (canvas_offset(x, min_x), canvas_offset(y, min_y)) else {
            return Err(SerStitchError::stitch_path(
                format!("placement out of range: ({x}, {y})"),
                &manifest_path,
            ));
        };
        width = width.max(offset_x + u64::from(image.width()));
        height = height.max(offset_y + u64::from(image.height()));
        placed.push(PlacedTile {
            image,
            x: offset_x as i64,
            y: offset_y as i64,
        });
    }

    let pixels = width.saturating_mul(height);
    if pixels > options.max_mosaic_pixels || width > u64::from(u32::MAX) || height > u64::from(u32::MAX) {
        return Err(SerStitchError::stitch_path(
            format!(
                "mosaic of {width}x{height} exceeds the limit of {} pixels; check the placement data",
                options.max_mosaic_pixels
            ),
            &manifest_path,
        ));
    }
    let (width, height) = (width as u32, height as u32);
    debug!("Composing {} tiles into {width}x{height}", placed.len());

    let canvas = match options.fusion {
        FusionMode::Overlay => compose_overlay(&placed, width, height),
        FusionMode::Average => compose_average(&placed, width, height),
    };

    let output = save_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| tiles_dir.join(&options.default_output_filename));
    write_atomic(&output, |file| {
        canvas
            .write_to(file, ImageFormat::Tiff)
            .map_err(|e| SerStitchError::write(&output, "cannot encode mosaic", e))
    })?;

    info!(
        "Stitched {} tiles into {} ({}x{})",
        placed.len(),
        output.display(),
        width,
        height
    );
    Ok(StitchedMosaic {
        path: output,
        width,
        height,
        tile_count: placed.len(),
    })
}

/// Pixel offset of `value` from the mosaic origin, `None` when it cannot lie on a canvas.
fn canvas_offset(value: f64, origin: f64) -> Option<u64> {
    let offset = (value - origin).round();
    (offset.is_finite() && (0.0..=f64::from(u32::MAX)).contains(&offset)).then_some(offset as u64)
}

fn compose_overlay(tiles: &[PlacedTile], width: u32, height: u32) -> GrayImage {
    let mut canvas = GrayImage::new(width, height);
    for tile in tiles {
        image::imageops::replace(&mut canvas, &tile.image, tile.x, tile.y);
    }
    canvas
}

fn compose_average(tiles: &[PlacedTile], width: u32, height: u32) -> GrayImage {
    let stride = width as usize;
    let mut sums = vec![0u32; stride * height as usize];
    let mut counts = vec![0u32; stride * height as usize];

    for tile in tiles {
        for (px, py, pixel) in tile.image.enumerate_pixels() {
            let x = tile.x as usize + px as usize;
            let y = tile.y as usize + py as usize;
            let index = y * stride + x;
            sums[index] += u32::from(pixel.0[0]);
            counts[index] += 1;
        }
    }

    let samples = sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &count)| {
            if count == 0 {
                0
            } else {
                ((sum + count / 2) / count) as u8
            }
        })
        .collect();
    GrayImage::from_raw(width, height, samples).unwrap_or_else(|| GrayImage::new(width, height))
}

#[cfg(test)]
#[path = "stitch_tests.rs"]
mod tests;
