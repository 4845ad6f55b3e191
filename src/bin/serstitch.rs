//! serstitch CLI - export TIA acquisitions into tiles and stitch them
//!
//! Runs the export-and-stitch pipeline over one input directory, with a
//! progress bar, Ctrl-C cancellation and a run report written next to the
//! outputs.

use clap::Parser;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::PrintDefaultConfig) => {
            cli::print_default_config().await?;
        }
        Some(Commands::ValidateConfig(args)) => {
            cli::validate_config(args, cli.verbose).await?;
        }
        None => {
            cli::run_command(cli.run).await?;
        }
    }

    Ok(())
}
