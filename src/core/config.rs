//! Configuration types and management for serstitch-rs.
//!
//! A single [`SerStitchConfig`] drives the whole run. It can be built in code,
//! loaded from YAML, or layered by the CLI on top of the defaults below.

use std::num::NonZeroU32;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ResultExt, SerStitchError};

/// Default glob used to select acquisition files.
pub const DEFAULT_FILENAME_FILTER: &str = "*.ser";

/// Default upper bound of the raw intensity window mapped onto 8 bits.
pub const DEFAULT_INTENSITY_RANGE: u32 = 1000;

/// Default manifest file name, understood by Fiji's Grid/Collection stitcher.
pub const TILE_CONF_NAME: &str = "TileConfiguration.txt";

/// Main configuration for the export-and-stitch pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerStitchConfig {
    /// Discovery, normalization and failure policy
    pub pipeline: PipelineConfig,

    /// Tile output layout
    #[serde(default)]
    pub export: ExportConfig,

    /// Manifest naming and formatting
    #[serde(default)]
    pub manifest: ManifestConfig,

    /// Mosaic composition
    #[serde(default)]
    pub stitch: StitchConfig,

    /// Worker pool sizing
    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl Default for SerStitchConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            export: ExportConfig::default(),
            manifest: ManifestConfig::default(),
            stitch: StitchConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl SerStitchConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.export.validate()?;
        self.manifest.validate(&self.export)?;
        self.stitch.validate(&self.export)?;
        self.performance.validate()?;
        if self.stitch.enabled && !self.manifest.prefixes.contains(&self.stitch.tiles_prefix) {
            return Err(SerStitchError::config_field(
                format!(
                    "stitching needs a manifest in '{}'; add it to manifest.prefixes",
                    self.stitch.tiles_prefix
                ),
                "manifest.prefixes",
            ));
        }
        Ok(())
    }
}

/// What the driver does when a single file fails to export
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole run on the first failed export
    #[default]
    FailFast,
    /// Log the failure, drop the file and continue with the remaining tiles
    Skip,
}

/// Discovery and normalization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Glob matched against file names inside the input directory
    pub filename_filter: String,

    /// Raw intensity that maps to the top 8-bit bin
    pub intensity_range: NonZeroU32,

    /// Export failure policy
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Extra attempts for a failed export (exports are idempotent overwrites)
    #[serde(default)]
    pub export_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filename_filter: DEFAULT_FILENAME_FILTER.to_string(),
            intensity_range: NonZeroU32::new(DEFAULT_INTENSITY_RANGE)
                .unwrap_or(NonZeroU32::MIN),
            failure_policy: FailurePolicy::FailFast,
            export_retries: 0,
        }
    }
}

impl PipelineConfig {
    /// Validate pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.filename_filter.trim().is_empty() {
            return Err(SerStitchError::config_field(
                "filename_filter must not be empty",
                "pipeline.filename_filter",
            ));
        }
        glob::Pattern::new(&self.filename_filter).map_err(|e| {
            SerStitchError::config_field(
                format!("invalid glob '{}': {e}", self.filename_filter),
                "pipeline.filename_filter",
            )
        })?;
        if self.export_retries > 10 {
            return Err(SerStitchError::config_field(
                format!("export_retries must be at most 10, got {}", self.export_retries),
                "pipeline.export_retries",
            ));
        }
        Ok(())
    }
}

/// Output layout of exported tiles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Subdirectory receiving the 16-bit tiles
    pub subdir_16bit: String,
    /// Subdirectory receiving the normalized 8-bit tiles
    pub subdir_8bit: String,
    /// Extension of the written tiles
    pub tile_extension: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            subdir_16bit: "16bit".to_string(),
            subdir_8bit: "8bit".to_string(),
            tile_extension: "tif".to_string(),
        }
    }
}

impl ExportConfig {
    /// Validate export configuration
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("export.subdir_16bit", &self.subdir_16bit),
            ("export.subdir_8bit", &self.subdir_8bit),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(SerStitchError::config_field(
                    format!("'{value}' is not a plain directory name"),
                    field,
                ));
            }
        }
        if self.subdir_16bit == self.subdir_8bit {
            return Err(SerStitchError::config_field(
                "16-bit and 8-bit tiles must go to different subdirectories",
                "export.subdir_8bit",
            ));
        }
        if !matches!(self.tile_extension.to_ascii_lowercase().as_str(), "tif" | "tiff") {
            return Err(SerStitchError::config_field(
                format!("unsupported tile extension '{}'", self.tile_extension),
                "export.tile_extension",
            ));
        }
        Ok(())
    }

    /// File name of the tile exported for an input stem
    pub fn tile_file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.tile_extension)
    }

    /// Every category prefix a manifest may reference
    pub fn known_prefixes(&self) -> [&str; 2] {
        [self.subdir_8bit.as_str(), self.subdir_16bit.as_str()]
    }
}

/// Manifest naming and formatting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestConfig {
    /// Manifest file name written inside each prefix directory
    pub filename: String,
    /// Output categories that receive a manifest
    pub prefixes: Vec<String>,
    /// Decimal places of the written coordinates
    pub coordinate_precision: usize,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            filename: TILE_CONF_NAME.to_string(),
            prefixes: vec!["8bit".to_string(), "16bit".to_string()],
            coordinate_precision: 3,
        }
    }
}

impl ManifestConfig {
    /// Validate manifest configuration against the export layout
    pub fn validate(&self, export: &ExportConfig) -> Result<()> {
        if self.filename.is_empty() || self.filename.contains(['/', '\\']) {
            return Err(SerStitchError::config_field(
                format!("'{}' is not a plain file name", self.filename),
                "manifest.filename",
            ));
        }
        if self.prefixes.is_empty() {
            return Err(SerStitchError::config_field(
                "at least one manifest prefix is required",
                "manifest.prefixes",
            ));
        }
        let known = export.known_prefixes();
        for prefix in &self.prefixes {
            if !known.contains(&prefix.as_str()) {
                return Err(SerStitchError::config_field(
                    format!("unknown prefix '{prefix}', expected one of {known:?}"),
                    "manifest.prefixes",
                ));
            }
        }
        if self.coordinate_precision > 9 {
            return Err(SerStitchError::config_field(
                "coordinate_precision must be at most 9",
                "manifest.coordinate_precision",
            ));
        }
        Ok(())
    }
}

/// How overlapping tiles are combined in the mosaic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Later tiles in manifest order overwrite earlier ones
    Overlay,
    /// Overlapping pixels take the mean of all covering tiles
    #[default]
    Average,
}

/// Mosaic composition settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StitchConfig {
    /// Run the stitching stage at all
    pub enabled: bool,
    /// Prefix directory whose tiles are stitched
    pub tiles_prefix: String,
    /// Mosaic file name inside the tiles directory, unless `save_path` is set
    pub output_filename: String,
    /// Explicit mosaic destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
    /// Overlap handling
    #[serde(default)]
    pub fusion: FusionMode,
    /// Refuse to allocate mosaics larger than this
    pub max_mosaic_pixels: u64,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tiles_prefix: "8bit".to_string(),
            output_filename: "stitched_mosaic.tif".to_string(),
            save_path: None,
            fusion: FusionMode::Average,
            max_mosaic_pixels: 1 << 30,
        }
    }
}

impl StitchConfig {
    /// Validate stitch configuration against the export layout
    pub fn validate(&self, export: &ExportConfig) -> Result<()> {
        if self.tiles_prefix != export.subdir_8bit {
            return Err(SerStitchError::config_field(
                format!(
                    "stitching reads the 8-bit tiles ('{}'), got '{}'",
                    export.subdir_8bit, self.tiles_prefix
                ),
                "stitch.tiles_prefix",
            ));
        }
        if self.output_filename.is_empty() || self.output_filename.contains(['/', '\\']) {
            return Err(SerStitchError::config_field(
                format!("'{}' is not a plain file name", self.output_filename),
                "stitch.output_filename",
            ));
        }
        if self.max_mosaic_pixels == 0 {
            return Err(SerStitchError::config_field(
                "max_mosaic_pixels must be greater than 0",
                "stitch.max_mosaic_pixels",
            ));
        }
        Ok(())
    }
}

/// Performance and resource limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PerformanceConfig {
    /// Export worker threads (0 = one per core)
    pub worker_threads: usize,
}

impl PerformanceConfig {
    /// Validate performance configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads > 1024 {
            return Err(SerStitchError::config_field(
                format!("worker_threads must be at most 1024, got {}", self.worker_threads),
                "performance.worker_threads",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
