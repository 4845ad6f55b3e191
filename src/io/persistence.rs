//! Atomic file persistence.
//!
//! Every artifact the pipeline produces is written to a temporary file in the
//! destination directory and renamed into place, so readers only ever observe
//! complete files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::core::errors::{Result, SerStitchError};

/// Create `dir` and its parents, reporting failures as write errors.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| SerStitchError::write(dir, "cannot create output directory", e))
}

/// Write `path` through `fill`, replacing any previous file in one rename.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|e| SerStitchError::write(path, "cannot create temporary file", e))?;
    fill(temp.as_file_mut())?;
    temp.as_file()
        .sync_all()
        .map_err(|e| SerStitchError::write(path, "cannot flush temporary file", e))?;
    temp.persist(path)
        .map_err(|e| SerStitchError::write(path, "cannot move file into place", e.error))?;
    Ok(())
}

/// Atomically write raw text.
pub fn write_text_atomic(path: &Path, contents: &str) -> Result<()> {
    write_atomic(path, |file| {
        file.write_all(contents.as_bytes())
            .map_err(|e| SerStitchError::write(path, "cannot write contents", e))
    })
}

/// Atomically write pretty-printed JSON.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")
            .and_then(|()| writer.flush())
            .map_err(|e| SerStitchError::write(path, "cannot write JSON", e))
    })
}

/// Remove a previous artifact; a missing file is not an error.
pub fn remove_stale(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SerStitchError::write(path, "cannot remove stale output", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_write_text_atomic_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.txt");

        write_text_atomic(&path, "first run with more text").unwrap();
        write_text_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_failed_fill_leaves_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let result = write_atomic(&path, |_| Err(SerStitchError::internal("encoder exploded")));

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_json_atomic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        write_json_atomic(&path, &json!({"tiles": 3})).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["tiles"], 3);
    }

    #[test]
    fn test_remove_stale_tolerates_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        assert!(!remove_stale(&path).unwrap());
        fs::write(&path, "x").unwrap();
        assert!(remove_stale(&path).unwrap());
        assert!(!path.exists());
    }
}
