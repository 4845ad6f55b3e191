//! Integration tests for the serstitch CLI

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

/// Test helper to get the CLI binary
fn serstitch_cmd() -> Command {
    Command::cargo_bin("serstitch").unwrap()
}

#[test]
fn test_cli_help() {
    serstitch_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--input_dir"))
        .stdout(predicate::str::contains("--save_dir"))
        .stdout(predicate::str::contains("print-default-config"));
}

#[test]
fn test_cli_version() {
    serstitch_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_directories_are_required() {
    serstitch_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--input_dir"));

    let dir = tempdir().unwrap();
    serstitch_cmd()
        .arg("--input_dir")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--save_dir"));
}

#[test]
fn test_run_writes_outputs_and_report() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    common::write_row(input.path(), &["a", "b", "c"]);

    serstitch_cmd()
        .arg("--input_dir")
        .arg(input.path())
        .arg("--save_dir")
        .arg(output.path())
        .arg("--quiet")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline completed"));

    assert!(output.path().join("8bit/TileConfiguration.txt").is_file());
    assert!(output.path().join("16bit/c.tif").is_file());
    assert!(output.path().join("8bit/stitched_mosaic.tif").is_file());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.path().join("pipeline_report.json")).unwrap())
            .unwrap();
    assert_eq!(report["final_state"], "done");
    assert_eq!(report["statistics"]["files_exported"], 3);
}

#[test]
fn test_json_format_prints_report() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    common::write_row(input.path(), &["a"]);

    let assert = serstitch_cmd()
        .arg("--input_dir")
        .arg(input.path())
        .arg("--save_dir")
        .arg(output.path())
        .args(["--format", "json"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["statistics"]["files_discovered"], 1);
    assert!(report["mosaic"]["path"].is_string());
}

#[test]
fn test_missing_input_dir_fails_with_stage() {
    let scratch = tempdir().unwrap();
    let save_dir = scratch.path().join("out");

    serstitch_cmd()
        .arg("--input_dir")
        .arg(scratch.path().join("missing"))
        .arg("--save_dir")
        .arg(&save_dir)
        .arg("--quiet")
        .assert()
        .failure()
        .stderr(predicate::str::contains("discovering"));

    assert!(!save_dir.exists());
}

#[test]
fn test_corrupt_file_fails_run() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    common::write_row(input.path(), &["a"]);
    fs::write(input.path().join("b.ser"), b"garbage").unwrap();

    serstitch_cmd()
        .arg("--input_dir")
        .arg(input.path())
        .arg("--save_dir")
        .arg(output.path())
        .arg("--quiet")
        .assert()
        .failure()
        .stderr(predicate::str::contains("b.ser"));

    assert!(!output.path().join("8bit/TileConfiguration.txt").exists());
}

#[test]
fn test_config_file_changes_filter() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    common::write_row(input.path(), &["a"]);
    fs::write(input.path().join("skip.dat"), b"not selected").unwrap();

    let config_path = input.path().join("serstitch.yml");
    fs::write(
        &config_path,
        "pipeline:\n  filename_filter: \"*.ser\"\n  intensity_range: 400\nstitch:\n  enabled: false\n  tiles_prefix: 8bit\n  output_filename: stitched_mosaic.tif\n  max_mosaic_pixels: 1048576\n",
    )
    .unwrap();

    serstitch_cmd()
        .arg("--input_dir")
        .arg(input.path())
        .arg("--save_dir")
        .arg(output.path())
        .arg("--config")
        .arg(&config_path)
        .arg("--quiet")
        .assert()
        .success();

    assert!(output.path().join("8bit/a.tif").is_file());
    assert!(!output.path().join("8bit/stitched_mosaic.tif").exists());
    let tile = image::open(output.path().join("8bit/a.tif")).unwrap().into_luma8();
    // 200 / 400 * 255 = 127.5
    assert_eq!(tile.get_pixel(0, 0).0[0], 128);
}

#[test]
fn test_print_default_config() {
    let assert = serstitch_cmd()
        .arg("print-default-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("filename_filter"))
        .stdout(predicate::str::contains("intensity_range: 1000"));

    // Skip the styled comment header
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let yaml = stdout.lines().skip(4).collect::<Vec<_>>().join("\n");
    let config: serstitch_rs::SerStitchConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(config, serstitch_rs::SerStitchConfig::default());
}

#[test]
fn test_validate_config_valid_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("serstitch.yml");
    serstitch_rs::SerStitchConfig::default()
        .to_yaml_file(&config_path)
        .unwrap();

    serstitch_cmd()
        .arg("validate-config")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file is valid"));
}

#[test]
fn test_validate_config_invalid_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("broken.yml");
    fs::write(&config_path, "pipeline:\n  filename_filter: \"[\"\n  intensity_range: 10\n").unwrap();

    serstitch_cmd()
        .arg("validate-config")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration validation failed"));
}
