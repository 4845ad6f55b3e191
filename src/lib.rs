//! # serstitch-rs: Acquisition Export and Mosaic Stitching
//!
//! Batch pipeline that converts TIA series (`.ser`) microscope acquisitions
//! into 16-bit and normalized 8-bit TIFF tiles, writes a Fiji-compatible
//! tile-position manifest and composes the tiles into a single mosaic.
//!
//! ## Pipeline
//!
//! ```text
//!              ┌──────────┐
//!              │ discover │
//!              └────┬─────┘
//!        ┌──────────┼──────────┐
//!   ┌────▼───┐ ┌────▼───┐ ┌────▼───┐     fan-out: one export per file
//!   │ export │ │ export │ │ export │
//!   └────┬───┘ └────┬───┘ └────┬───┘
//!        └──────────┼──────────┘
//!             ┌─────▼─────┐             fan-in: hard barrier
//!             │ aggregate │
//!             └─────┬─────┘
//!                   ┆                   ordering edge, no payload
//!              ┌────▼───┐
//!              │ stitch │
//!              └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serstitch_rs::{ExportStitchPipeline, SerStitchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = ExportStitchPipeline::new("./raw", "./out", SerStitchConfig::default())?;
//!     let report = pipeline.run().await?;
//!
//!     println!("Exported {} tiles", report.statistics.files_exported);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Configuration, errors and the pipeline driver
pub mod core {
    //! Configuration, error types, shared data model and the pipeline.

    pub mod config;
    pub mod errors;
    pub mod metadata;
    pub mod pipeline;
}

// Acquisition readers
pub mod acquisition;

// Tile, manifest and persistence I/O
pub mod io {
    //! File artifacts: tiles, manifests and atomic writes.

    pub mod manifest;
    pub mod persistence;
    pub mod tiles;
}

// Mosaic composition
pub mod stitch;

// Re-export primary types for convenience
pub use crate::core::config::SerStitchConfig;
pub use crate::core::errors::{Result, ResultExt, SerStitchError};
pub use crate::core::pipeline::{ExportStitchPipeline, PipelineReport, PipelineState};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
