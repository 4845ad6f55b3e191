//! Summary tables printed after a run and by `validate-config`.

use owo_colors::OwoColorize;
use tabled::{settings::Style as TableStyle, Table, Tabled};

use serstitch_rs::core::config::{FailurePolicy, SerStitchConfig};
use serstitch_rs::core::pipeline::PipelineReport;

#[derive(Tabled)]
struct SummaryRow {
    metric: String,
    value: String,
}

fn row(metric: &str, value: impl ToString) -> SummaryRow {
    SummaryRow {
        metric: metric.to_string(),
        value: value.to_string(),
    }
}

fn print_table(rows: Vec<SummaryRow>) {
    let mut table = Table::new(rows);
    table.with(TableStyle::rounded());
    println!("{}", table);
    println!();
}

/// Print the outcome of a pipeline run
pub fn display_run_summary(report: &PipelineReport) {
    println!();
    if report.succeeded() {
        println!("{}", "Pipeline completed".bright_green().bold());
    } else {
        println!("{}", "Pipeline failed".red().bold());
    }
    println!();

    let stats = &report.statistics;
    let mut rows = vec![
        row("Run", &report.run_id),
        row("Final state", report.final_state),
        row("Files discovered", stats.files_discovered),
        row("Files exported", stats.files_exported),
        row("Files failed", stats.files_failed),
        row("Manifest rows", stats.manifest_rows),
    ];
    if stats.files_cancelled > 0 {
        rows.push(row("Files cancelled", stats.files_cancelled));
    }
    if stats.export_retries > 0 {
        rows.push(row("Export retries", stats.export_retries));
    }
    if let Some(mosaic) = &report.mosaic {
        rows.push(row("Mosaic", mosaic.path.display()));
        rows.push(row("Mosaic size", format!("{}x{}", mosaic.width, mosaic.height)));
    }
    if let Some(seconds) = report.duration_secs() {
        rows.push(row("Duration", format!("{seconds:.2}s")));
    }
    print_table(rows);

    if !report.stage_timings.is_empty() {
        let timing_rows = report
            .stage_timings
            .iter()
            .map(|(stage, seconds)| row(stage.name(), format!("{seconds:.3}s")))
            .collect();
        print_table(timing_rows);
    }

    for skipped in &report.skipped_files {
        println!(
            "{} {}: {}",
            "skipped".yellow(),
            skipped.input.display(),
            skipped.error
        );
    }

    if let Some(failure) = &report.failure {
        let input = failure
            .input
            .as_ref()
            .map(|path| format!(" ({})", path.display()))
            .unwrap_or_default();
        eprintln!(
            "{} stage '{}'{}: {}",
            "error:".red().bold(),
            failure.stage,
            input,
            failure.message
        );
    }
}

/// Print the settings a configuration resolves to
pub fn display_config_summary(config: &SerStitchConfig, verbose: bool) {
    let mut rows = vec![
        row("Filename filter", &config.pipeline.filename_filter),
        row("Intensity range", config.pipeline.intensity_range),
        row(
            "Failure policy",
            match config.pipeline.failure_policy {
                FailurePolicy::FailFast => "fail fast",
                FailurePolicy::Skip => "skip",
            },
        ),
        row("Manifest", &config.manifest.filename),
        row("Manifest prefixes", config.manifest.prefixes.join(", ")),
        row("Stitching", if config.stitch.enabled { "enabled" } else { "disabled" }),
    ];

    if verbose {
        rows.push(row("Export retries", config.pipeline.export_retries));
        rows.push(row("16-bit subdirectory", &config.export.subdir_16bit));
        rows.push(row("8-bit subdirectory", &config.export.subdir_8bit));
        rows.push(row("Coordinate precision", config.manifest.coordinate_precision));
        rows.push(row("Fusion", format!("{:?}", config.stitch.fusion).to_lowercase()));
        rows.push(row("Max mosaic pixels", config.stitch.max_mosaic_pixels));
        rows.push(row(
            "Worker threads",
            match config.performance.worker_threads {
                0 => "one per core".to_string(),
                n => n.to_string(),
            },
        ));
    }

    print_table(rows);
}
