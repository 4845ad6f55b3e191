use super::*;
use crate::core::metadata::{PixelSize, STAGE_X_KEY, STAGE_Y_KEY};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use tempfile::tempdir;

fn record(name: &str, stage: Option<(f64, f64)>, pixel_size_um: f64) -> ExportMetadata {
    let mut fields = BTreeMap::new();
    if let Some((x, y)) = stage {
        fields.insert(STAGE_X_KEY.to_string(), json!(x));
        fields.insert(STAGE_Y_KEY.to_string(), json!(y));
    }
    ExportMetadata {
        source_file: PathBuf::from(format!("/in/{name}.ser")),
        image_file_name: format!("{name}.tif"),
        pixel_size: pixel_size_um,
        pixel_size_native: PixelSize::new(vec![pixel_size_um * 1e-6; 2]).unwrap(),
        fields,
    }
}

#[test]
fn test_placement_is_stage_position_in_pixels() {
    // 2 um stage offset at 0.5 um per pixel is 4 pixels
    let records = vec![
        record("a", Some((0.0, 0.0)), 0.5),
        record("b", Some((2.0e-6, -1.0e-6)), 0.5),
    ];
    let manifest = TileManifest::from_records(&records).unwrap();

    assert_eq!(manifest.entries.len(), 2);
    assert_eq!(manifest.entries[1].image_file_name, "b.tif");
    approx::assert_relative_eq!(manifest.entries[1].position[0], 4.0, max_relative = 1e-9);
    approx::assert_relative_eq!(manifest.entries[1].position[1], -2.0, max_relative = 1e-9);
}

#[test]
fn test_render_is_fiji_format() {
    let manifest = TileManifest::from_records(&[
        record("a", Some((0.0, 0.0)), 0.5),
        record("b", Some((2.0e-6, 0.0)), 0.5),
    ])
    .unwrap();

    let text = manifest.render(3);
    let expected = "\
# Define the number of dimensions we are working on
dim = 2

# Define the image coordinates
a.tif; ; (0.000, 0.000)
b.tif; ; (4.000, 0.000)
";
    assert_eq!(text, expected);
}

#[test]
fn test_render_folds_negative_zero() {
    let manifest = TileManifest {
        dimensions: 2,
        entries: vec![ManifestEntry {
            image_file_name: "a.tif".to_string(),
            position: vec![-0.0, -0.0001],
        }],
    };
    assert!(manifest.render(3).contains("a.tif; ; (0.000, 0.000)"));
}

#[test]
fn test_parse_round_trips_rendered_text() {
    let manifest = TileManifest {
        dimensions: 2,
        entries: vec![
            ManifestEntry {
                image_file_name: "a.tif".to_string(),
                position: vec![4.0, 12.5],
            },
            ManifestEntry {
                image_file_name: "b.tif".to_string(),
                position: vec![-3.25, 0.0],
            },
        ],
    };
    let parsed = TileManifest::parse(&manifest.render(3)).unwrap();
    assert_eq!(parsed, manifest);
}

#[test]
fn test_parse_header_only_manifest() {
    let parsed = TileManifest::parse(&TileManifest::empty().render(3)).unwrap();
    assert_eq!(parsed.dimensions, 2);
    assert!(parsed.entries.is_empty());
}

#[test]
fn test_parse_rejects_malformed_rows() {
    for text in [
        "dim = 2\na.tif; ; 1.0, 2.0\n",
        "dim = 2\na.tif; ; (1.0)\n",
        "dim = 2\na.tif; ; (1.0, nope)\n",
        "a.tif; ; (1.0, 2.0)\n",
        "dim = 7\n",
        "# nothing here\n",
        "dim = 2\n; ; (1.0, 2.0)\n",
    ] {
        let err = TileManifest::parse(text).unwrap_err();
        assert!(matches!(err, SerStitchError::Stitch { .. }), "{text:?}");
    }
}

#[test]
fn test_missing_stage_position_is_aggregation_error() {
    let err = TileManifest::from_records(&[record("a", None, 0.5)]).unwrap_err();
    match err {
        SerStitchError::Aggregation { record, .. } => assert_eq!(record.as_deref(), Some("a.tif")),
        other => panic!("Expected Aggregation error, got {other:?}"),
    }
}

#[test]
fn test_duplicate_names_are_rejected() {
    let records = vec![
        record("a", Some((0.0, 0.0)), 0.5),
        record("a", Some((1.0e-6, 0.0)), 0.5),
    ];
    assert!(matches!(
        TileManifest::from_records(&records),
        Err(SerStitchError::Aggregation { .. })
    ));
}

#[test]
fn test_inconsistent_pixel_sizes_are_rejected() {
    let records = vec![
        record("a", Some((0.0, 0.0)), 0.5),
        record("b", Some((1.0e-6, 0.0)), 0.75),
    ];
    assert!(TileManifest::from_records(&records).is_err());
}

#[test]
fn test_write_manifests_requires_existing_tiles() {
    let dir = tempdir().unwrap();
    let prefixes = vec!["8bit".to_string(), "16bit".to_string()];
    fs::create_dir_all(dir.path().join("8bit")).unwrap();
    fs::write(dir.path().join("8bit/a.tif"), b"tile").unwrap();

    let records = vec![record("a", Some((0.0, 0.0)), 0.5)];
    let err = write_manifests(&records, dir.path(), &prefixes, "TileConfiguration.txt", 3)
        .unwrap_err();

    assert!(matches!(err, SerStitchError::Aggregation { .. }));
    assert!(!dir.path().join("8bit/TileConfiguration.txt").exists());
}

#[test]
fn test_write_manifests_one_file_per_prefix_and_deterministic() {
    let dir = tempdir().unwrap();
    let prefixes = vec!["8bit".to_string(), "16bit".to_string()];
    for prefix in &prefixes {
        fs::create_dir_all(dir.path().join(prefix)).unwrap();
        fs::write(dir.path().join(prefix).join("a.tif"), b"tile").unwrap();
        fs::write(dir.path().join(prefix).join("b.tif"), b"tile").unwrap();
    }
    let records = vec![
        record("a", Some((0.0, 0.0)), 0.5),
        record("b", Some((5.0e-6, 0.0)), 0.5),
    ];

    let written =
        write_manifests(&records, dir.path(), &prefixes, "TileConfiguration.txt", 3).unwrap();
    assert_eq!(written.len(), 2);
    let first = fs::read(&written[0]).unwrap();

    write_manifests(&records, dir.path(), &prefixes, "TileConfiguration.txt", 3).unwrap();
    assert_eq!(fs::read(&written[0]).unwrap(), first);
    assert_eq!(fs::read(&written[1]).unwrap(), first);

    let parsed = TileManifest::read(&written[0]).unwrap();
    assert_eq!(parsed.entries.len(), 2);
}

#[test]
fn test_read_missing_manifest_is_stitch_error() {
    let dir = tempdir().unwrap();
    let err = TileManifest::read(&dir.path().join("TileConfiguration.txt")).unwrap_err();
    assert!(matches!(err, SerStitchError::Stitch { path: Some(_), .. }));
}
