//! Acquisition file discovery.
//!
//! Discovery only looks at regular files directly inside the input directory
//! and matches their names against a case-sensitive glob. Results are sorted by
//! path so manifests come out identical across runs and platforms.

use std::fs;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use tracing::{debug, info};

use crate::core::errors::{Result, SerStitchError};
use crate::core::metadata::InputFile;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Find every file in `input_dir` whose name matches `pattern`.
pub fn discover_files(input_dir: &Path, pattern: &str) -> Result<Vec<InputFile>> {
    let pattern = compile_pattern(pattern, input_dir)?;

    if !input_dir.exists() {
        return Err(SerStitchError::discovery("input directory does not exist", input_dir));
    }
    if !input_dir.is_dir() {
        return Err(SerStitchError::discovery("input path is not a directory", input_dir));
    }

    let entries = fs::read_dir(input_dir)
        .map_err(|e| SerStitchError::discovery(format!("cannot list directory: {e}"), input_dir))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| SerStitchError::discovery(format!("cannot read entry: {e}"), input_dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            debug!("Skipping non UTF-8 file name {}", path.display());
            continue;
        };
        if pattern.matches_with(name, MATCH_OPTIONS) {
            files.push(path);
        }
    }
    files.sort();

    info!(
        "Discovered {} file(s) matching '{}' in {}",
        files.len(),
        pattern.as_str(),
        input_dir.display()
    );
    Ok(files.into_iter().map(InputFile::new).collect())
}

fn compile_pattern(pattern: &str, input_dir: &Path) -> Result<Pattern> {
    if pattern.is_empty() {
        return Err(SerStitchError::discovery("filename pattern is empty", input_dir));
    }
    Pattern::new(pattern).map_err(|e| {
        SerStitchError::discovery(format!("invalid filename pattern '{pattern}': {e}"), input_dir)
    })
}
