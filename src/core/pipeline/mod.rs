//! Export-and-stitch pipeline
//!
//! This module turns a directory of acquisition files into exported tiles, a
//! tile-position manifest and a stitched mosaic.
//!
//! ## Stages
//!
//! 1. **Discovery**: select acquisition files by glob, sorted by path
//! 2. **Export** (fan-out): one independent task per file on a worker pool,
//!    writing a 16-bit and a normalized 8-bit tile
//! 3. **Aggregation** (fan-in): a hard barrier over every export record,
//!    then the manifest is written atomically for each output prefix
//! 4. **Stitching**: gated on aggregation by an ordering edge in the
//!    [`TaskGraph`], composes the 8-bit tiles into one mosaic
//!
//! Any fatal error moves the run to `Failed` and is reported together with the
//! stage and the input that caused it.
//!
//! ## Usage
//!
//! ```ignore
//! use serstitch_rs::core::config::SerStitchConfig;
//! use serstitch_rs::core::pipeline::ExportStitchPipeline;
//!
//! let pipeline = ExportStitchPipeline::new("./raw", "./out", SerStitchConfig::default())?;
//! let report = pipeline.run().await?;
//! println!("Mosaic: {:?}", report.mosaic.map(|m| m.path));
//! ```

pub use export_stage::{export, export_file, ExportContext};
pub use fan_out::{FanOutPolicy, TaskOutcome, WorkerPool};
pub use file_discovery::discover_files;
pub use pipeline_executor::{
    export_and_stitch, ExportStitchPipeline, PipelineRun, ProgressCallback, METADATA_FILE_NAME,
};
pub use pipeline_results::{
    FailureSummary, PipelineReport, RunStatistics, SkippedFile, REPORT_FILE_NAME,
};
pub use run_state::{PipelineState, RunState, StageFailure, StateTransition};
pub use services::{
    AcquisitionLoader, FijiManifestWriter, FileDiscoverer, GlobFileDiscoverer, ManifestWriter,
    PlacementStitcher, SerAcquisitionLoader, TiffTileExporter, TileExporter, TileStitcher,
};
pub use task_graph::{Dependency, Stage, TaskGraph};

mod export_stage;
mod fan_out;
mod file_discovery;
mod pipeline_executor;
mod pipeline_results;
mod run_state;
mod services;
mod task_graph;
