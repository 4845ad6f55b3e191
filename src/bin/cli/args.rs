//! CLI Argument Structures
//!
//! The default invocation runs the pipeline and requires both directories.
//! Subcommands only deal with configuration files, so the directory flags are
//! not required when one is given.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Export TIA acquisitions into TIFF tiles and stitch them into a mosaic
#[derive(Parser)]
#[command(name = "serstitch")]
#[command(version = VERSION)]
#[command(about = "Export .ser acquisitions into 16-bit/8-bit TIFF tiles and stitch a mosaic")]
#[command(long_about = "
Convert every acquisition in a directory into 16-bit and normalized 8-bit TIFF
tiles, write a Fiji TileConfiguration.txt manifest and compose the 8-bit tiles
into one mosaic.

Common Usage:

  # Run the pipeline with defaults (*.ser, intensity range 1000)
  serstitch --input_dir ./raw --save_dir ./out

  # Layer a YAML configuration under the directory flags
  serstitch --input_dir ./raw --save_dir ./out --config serstitch.yml

  # Show or check configuration files
  serstitch print-default-config > serstitch.yml
  serstitch validate-config --config serstitch.yml
")]
#[command(subcommand_negates_reqs = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,

    /// Validate a serstitch configuration file
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}

/// Arguments of a pipeline run
#[derive(Args)]
pub struct RunArgs {
    /// Directory containing the acquisition files
    #[arg(long = "input_dir", value_name = "DIR", required = true)]
    pub input_dir: Option<PathBuf>,

    /// Output root for tiles, manifests and the mosaic
    #[arg(long = "save_dir", value_name = "DIR", required = true)]
    pub save_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Summary format printed after the run
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ValidateConfigArgs {
    /// Configuration file to validate
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary table
    Table,
    /// The run report as JSON on stdout
    Json,
}
