//! Per-file export.
//!
//! One invocation loads an acquisition, writes its 16-bit and normalized 8-bit
//! tiles and returns the record the aggregator consumes. Invocations only read
//! the shared [`ExportContext`] and write files named after their own input, so
//! any number of them may run at once.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::services::{AcquisitionLoader, SerAcquisitionLoader, TiffTileExporter, TileExporter};
use crate::core::config::ExportConfig;
use crate::core::errors::{Result, SerStitchError};
use crate::core::metadata::{ExportMetadata, InputFile};

/// Read-only context shared by every export invocation of a run.
#[derive(Clone)]
pub struct ExportContext {
    /// Output root
    pub save_dir: PathBuf,
    /// Raw intensity mapped to the top 8-bit bin
    pub intensity_range: NonZeroU32,
    /// Output layout
    pub layout: ExportConfig,
    /// Acquisition reader
    pub loader: Arc<dyn AcquisitionLoader>,
    /// Tile writer
    pub exporter: Arc<dyn TileExporter>,
}

impl ExportContext {
    /// Context using the default SER loader and TIFF exporter
    pub fn new(save_dir: impl Into<PathBuf>, intensity_range: NonZeroU32) -> Self {
        Self {
            save_dir: save_dir.into(),
            intensity_range,
            layout: ExportConfig::default(),
            loader: SerAcquisitionLoader::shared(),
            exporter: TiffTileExporter::shared(),
        }
    }

    /// Directory receiving the 16-bit tiles
    pub fn dir_16bit(&self) -> PathBuf {
        self.save_dir.join(&self.layout.subdir_16bit)
    }

    /// Directory receiving the 8-bit tiles
    pub fn dir_8bit(&self) -> PathBuf {
        self.save_dir.join(&self.layout.subdir_8bit)
    }
}

impl std::fmt::Debug for ExportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportContext")
            .field("save_dir", &self.save_dir)
            .field("intensity_range", &self.intensity_range)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Export one acquisition file with the default collaborators.
pub fn export(file: &InputFile, save_dir: &Path, intensity_range: NonZeroU32) -> Result<ExportMetadata> {
    export_file(file, &ExportContext::new(save_dir, intensity_range))
}

/// Export one acquisition file through the context's collaborators.
pub fn export_file(file: &InputFile, ctx: &ExportContext) -> Result<ExportMetadata> {
    let stem = file.stem()?;
    let acquisition = ctx.loader.load(file)?;
    debug!(
        "Loaded {} ({}x{})",
        file.path().display(),
        acquisition.width(),
        acquisition.height()
    );
    let pixel_size_um = acquisition
        .pixel_size
        .to_micrometers()
        .map_err(|e| SerStitchError::load(file.path(), e.to_string()))?;

    let tile_name = ctx.layout.tile_file_name(&stem);
    let tile_16 = ctx.exporter.export_16bit(
        &acquisition.data,
        &acquisition.pixel_size,
        &ctx.dir_16bit(),
        &tile_name,
    )?;
    let tile_8 = ctx.exporter.export_8bit_normalized(
        &acquisition.data,
        &acquisition.pixel_size,
        &ctx.dir_8bit(),
        &tile_name,
        ctx.intensity_range,
    )?;
    debug!(
        "Exported {} -> {}, {}",
        file.path().display(),
        tile_16.display(),
        tile_8.display()
    );

    let mut fields = acquisition.metadata;
    // Derived keys win over native ones of the same name.
    for key in ["source_file", "image_file_name", "pixel_size", "pixel_size_native"] {
        if fields.remove(key).is_some() {
            debug!("Native field '{key}' of {} replaced by derived value", file.path().display());
        }
    }

    Ok(ExportMetadata {
        source_file: file.path().to_path_buf(),
        image_file_name: tile_name,
        pixel_size: pixel_size_um,
        pixel_size_native: acquisition.pixel_size,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Acquisition;
    use crate::core::metadata::PixelSize;
    use approx::assert_relative_eq;
    use ndarray::array;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct FixedLoader;

    impl AcquisitionLoader for FixedLoader {
        fn load(&self, _file: &InputFile) -> Result<Acquisition> {
            let mut metadata = BTreeMap::new();
            metadata.insert("stage_x".to_string(), json!(1.0e-6));
            metadata.insert("stage_y".to_string(), json!(2.0e-6));
            metadata.insert("image_file_name".to_string(), json!("native.raw"));
            Ok(Acquisition {
                metadata,
                data: array![[0.0, 500.0], [1000.0, 70000.0]],
                pixel_size: PixelSize::new(vec![2.0e-9, 2.0e-9])?,
            })
        }
    }

    fn context(save_dir: &Path) -> ExportContext {
        ExportContext {
            loader: Arc::new(FixedLoader),
            ..ExportContext::new(save_dir, NonZeroU32::new(1000).unwrap())
        }
    }

    #[test]
    fn test_export_writes_both_tiles_and_record() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let record = export_file(&InputFile::new("/data/a.ser"), &ctx).unwrap();

        assert_eq!(record.image_file_name, "a.tif");
        assert_eq!(record.source_file, PathBuf::from("/data/a.ser"));
        assert_relative_eq!(record.pixel_size, 2.0e-3, max_relative = 1e-12);
        assert_eq!(record.stage_position(), Some((1.0e-6, 2.0e-6)));
        assert!(!record.fields.contains_key("image_file_name"));

        let tile_8 = image::open(dir.path().join("8bit/a.tif")).unwrap().into_luma8();
        assert_eq!(tile_8.as_raw(), &vec![0, 128, 255, 255]);
        let tile_16 = image::open(dir.path().join("16bit/a.tif")).unwrap().into_luma16();
        assert_eq!(tile_16.as_raw(), &vec![0, 500, 1000, 65535]);
    }

    #[test]
    fn test_invalid_pixel_size_is_load_error() {
        struct BadScale;
        impl AcquisitionLoader for BadScale {
            fn load(&self, _file: &InputFile) -> Result<Acquisition> {
                Ok(Acquisition {
                    metadata: BTreeMap::new(),
                    data: array![[1.0]],
                    pixel_size: PixelSize::new(vec![0.0, 0.0])?,
                })
            }
        }

        let dir = tempdir().unwrap();
        let ctx = ExportContext {
            loader: Arc::new(BadScale),
            ..ExportContext::new(dir.path(), NonZeroU32::new(10).unwrap())
        };
        let err = export_file(&InputFile::new("b.ser"), &ctx).unwrap_err();
        assert!(matches!(err, SerStitchError::Load { .. }));
        assert!(!dir.path().join("8bit/b.tif").exists());
    }

    #[test]
    fn test_unreadable_file_fails_single_export() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("broken.ser");
        std::fs::write(&input, b"not a ser file").unwrap();

        let err = export(&InputFile::new(&input), dir.path(), NonZeroU32::new(1000).unwrap())
            .unwrap_err();
        assert!(matches!(err, SerStitchError::Load { .. }));
    }
}
