//! Command execution: pipeline runs and configuration handling.

use std::path::Path;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::warn;

use serstitch_rs::core::config::SerStitchConfig;
use serstitch_rs::core::pipeline::{ExportStitchPipeline, ProgressCallback, Stage, REPORT_FILE_NAME};

use super::args::{OutputFormat, RunArgs, ValidateConfigArgs};
use super::output::{display_config_summary, display_run_summary};

/// Run the export-and-stitch pipeline
pub async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let input_dir = args.input_dir.context("--input_dir is required")?;
    let save_dir = args.save_dir.context("--save_dir is required")?;
    let config = load_configuration(args.config.as_deref()).await?;

    let mut pipeline = ExportStitchPipeline::new(&input_dir, &save_dir, config)?;

    let progress = if args.quiet || args.format == OutputFormat::Json {
        None
    } else {
        let pb = ProgressBar::new(100);
        pb.set_style(ProgressStyle::with_template(
            "{msg:30} [{bar:40.bright_blue/blue}] {pos:>3}% {elapsed_precise}",
        )?);
        let callback: ProgressCallback = Box::new({
            let pb = pb.clone();
            move |message: &str, percent: f64| {
                pb.set_message(message.to_string());
                pb.set_position(percent.clamp(0.0, 100.0) as u64);
            }
        });
        pipeline = pipeline.with_progress_callback(callback);
        Some(pb)
    };

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; letting running exports finish, then stopping");
            cancel.cancel();
        }
    });

    let run = pipeline.execute().await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    // A run halted by discovery has not touched the output directory yet.
    let halted_at_discovery = run
        .report
        .failure
        .as_ref()
        .is_some_and(|failure| failure.stage == Stage::Discover);
    if !halted_at_discovery {
        let report_path = save_dir.join(REPORT_FILE_NAME);
        if let Err(e) = run.report.write_json(&report_path) {
            warn!("Could not write run report {}: {e}", report_path.display());
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run.report)?),
        OutputFormat::Table => display_run_summary(&run.report),
    }

    run.outcome?;
    Ok(())
}

/// Print default configuration in YAML format
pub async fn print_default_config() -> anyhow::Result<()> {
    println!("{}", "# Default serstitch configuration".dimmed());
    println!("{}", "# Save this to a file and customize as needed".dimmed());
    println!(
        "{}",
        "# Usage: serstitch --input_dir <DIR> --save_dir <DIR> --config your-config.yml".dimmed()
    );
    println!();

    let config = SerStitchConfig::default();
    let yaml_output = serde_yaml::to_string(&config)?;
    println!("{}", yaml_output);

    Ok(())
}

/// Validate a configuration file
pub async fn validate_config(args: ValidateConfigArgs, verbose: bool) -> anyhow::Result<()> {
    println!(
        "{} {}",
        "Validating configuration:".bright_blue().bold(),
        args.config.display().to_string().cyan()
    );
    println!();

    let config = match load_configuration(Some(&args.config)).await {
        Ok(config) => {
            println!("{}", "Configuration file is valid!".bright_green().bold());
            println!();
            config
        }
        Err(e) => {
            eprintln!("{} {:#}", "Configuration validation failed:".red(), e);
            println!();
            println!("{}", "Common issues:".bright_blue().bold());
            println!("   • Check YAML syntax (indentation, colons, quotes)");
            println!("   • intensity_range must be a positive integer");
            println!("   • filename_filter must be a valid glob");
            println!();
            println!(
                "{}",
                "Tip: Use 'serstitch print-default-config' to see valid format".dimmed()
            );
            std::process::exit(1);
        }
    };

    display_config_summary(&config, verbose);
    Ok(())
}

/// Load and validate configuration from file or use defaults
pub async fn load_configuration(config_path: Option<&Path>) -> anyhow::Result<SerStitchConfig> {
    let config: SerStitchConfig = match config_path {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => serde_json::from_str(&content)?,
                _ => serde_yaml::from_str(&content)?,
            }
        }
        None => SerStitchConfig::default(),
    };

    config.validate()?;
    Ok(config)
}
