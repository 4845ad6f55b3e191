use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::acquisition::{self, Acquisition};
use crate::core::errors::Result;
use crate::core::metadata::{ExportMetadata, InputFile, PixelSize};
use crate::io::{manifest, tiles};
use crate::stitch::{self, CompositorOptions, StitchedMosaic};

use super::file_discovery;

/// Service responsible for turning an input directory into acquisition files.
pub trait FileDiscoverer: Send + Sync {
    fn discover(&self, input_dir: &Path, pattern: &str) -> Result<Vec<InputFile>>;
}

/// Default discovery: case-sensitive glob over the directory's regular files.
#[derive(Default, Debug)]
pub struct GlobFileDiscoverer;

impl FileDiscoverer for GlobFileDiscoverer {
    fn discover(&self, input_dir: &Path, pattern: &str) -> Result<Vec<InputFile>> {
        file_discovery::discover_files(input_dir, pattern)
    }
}

impl GlobFileDiscoverer {
    pub fn shared() -> Arc<dyn FileDiscoverer> {
        Arc::new(Self)
    }
}

/// Service responsible for reading one acquisition record.
pub trait AcquisitionLoader: Send + Sync {
    fn load(&self, file: &InputFile) -> Result<Acquisition>;
}

/// Loader for TIA series (`.ser`) files.
#[derive(Default, Debug)]
pub struct SerAcquisitionLoader;

impl AcquisitionLoader for SerAcquisitionLoader {
    fn load(&self, file: &InputFile) -> Result<Acquisition> {
        acquisition::read_ser_file(file.path())
    }
}

impl SerAcquisitionLoader {
    pub fn shared() -> Arc<dyn AcquisitionLoader> {
        Arc::new(Self)
    }
}

/// Service responsible for persisting the two tile representations.
///
/// Both methods write `dir/<basename>` and return the written path. Calls for
/// distinct basenames never touch the same file.
pub trait TileExporter: Send + Sync {
    fn export_16bit(
        &self,
        data: &ndarray::Array2<f64>,
        pixel_size: &PixelSize,
        dir: &Path,
        basename: &str,
    ) -> Result<PathBuf>;

    fn export_8bit_normalized(
        &self,
        data: &ndarray::Array2<f64>,
        pixel_size: &PixelSize,
        dir: &Path,
        basename: &str,
        intensity_range: NonZeroU32,
    ) -> Result<PathBuf>;
}

/// Grayscale TIFF exporter.
#[derive(Default, Debug)]
pub struct TiffTileExporter;

impl TileExporter for TiffTileExporter {
    fn export_16bit(
        &self,
        data: &ndarray::Array2<f64>,
        _pixel_size: &PixelSize,
        dir: &Path,
        basename: &str,
    ) -> Result<PathBuf> {
        let path = dir.join(basename);
        tiles::write_u16_tiff(data, &path)?;
        Ok(path)
    }

    fn export_8bit_normalized(
        &self,
        data: &ndarray::Array2<f64>,
        _pixel_size: &PixelSize,
        dir: &Path,
        basename: &str,
        intensity_range: NonZeroU32,
    ) -> Result<PathBuf> {
        let path = dir.join(basename);
        tiles::write_u8_tiff(data, intensity_range, &path)?;
        Ok(path)
    }
}

impl TiffTileExporter {
    pub fn shared() -> Arc<dyn TileExporter> {
        Arc::new(Self)
    }
}

/// Service responsible for the tile-position manifest.
pub trait ManifestWriter: Send + Sync {
    /// Write `dir/<prefix>/<filename>` for every prefix, returning the written paths.
    fn write_manifest(
        &self,
        records: &[ExportMetadata],
        dir: &Path,
        prefixes: &[String],
        filename: &str,
    ) -> Result<Vec<PathBuf>>;
}

/// Writer for Fiji `TileConfiguration.txt` manifests.
#[derive(Debug, Clone)]
pub struct FijiManifestWriter {
    precision: usize,
}

impl FijiManifestWriter {
    pub fn new(precision: usize) -> Self {
        Self { precision }
    }

    pub fn shared(precision: usize) -> Arc<dyn ManifestWriter> {
        Arc::new(Self::new(precision))
    }
}

impl Default for FijiManifestWriter {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ManifestWriter for FijiManifestWriter {
    fn write_manifest(
        &self,
        records: &[ExportMetadata],
        dir: &Path,
        prefixes: &[String],
        filename: &str,
    ) -> Result<Vec<PathBuf>> {
        manifest::write_manifests(records, dir, prefixes, filename, self.precision)
    }
}

/// Service responsible for composing the mosaic.
pub trait TileStitcher: Send + Sync {
    fn stitch(
        &self,
        tiles_dir: &Path,
        manifest_filename: &str,
        save_path: Option<&Path>,
    ) -> Result<StitchedMosaic>;
}

/// Stitcher that places tiles exactly at their manifest coordinates.
#[derive(Debug, Clone)]
pub struct PlacementStitcher {
    options: CompositorOptions,
}

impl PlacementStitcher {
    pub fn new(options: CompositorOptions) -> Self {
        Self { options }
    }

    pub fn shared(options: CompositorOptions) -> Arc<dyn TileStitcher> {
        Arc::new(Self::new(options))
    }
}

impl TileStitcher for PlacementStitcher {
    fn stitch(
        &self,
        tiles_dir: &Path,
        manifest_filename: &str,
        save_path: Option<&Path>,
    ) -> Result<StitchedMosaic> {
        stitch::stitch_tiles(tiles_dir, manifest_filename, save_path, &self.options)
    }
}
