//! Error types for the serstitch-rs library.
//!
//! Every pipeline stage reports failures through [`SerStitchError`]. The
//! stage-specific variants (`Discovery`, `Load`, `Write`, `Aggregation`,
//! `Stitch`) carry the path that triggered them, and the driver wraps the first
//! fatal error in [`SerStitchError::StageFailed`] so callers always learn which
//! stage and which input halted the run.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main result type for serstitch operations.
pub type Result<T> = std::result::Result<T, SerStitchError>;

/// Comprehensive error type for all serstitch operations.
#[derive(Error, Debug)]
pub enum SerStitchError {
    /// I/O related errors not attributable to a specific stage
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Validation errors for input data
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
    },

    /// Input directory or filename pattern could not be used
    #[error("Discovery error: {message}")]
    Discovery {
        /// Error description
        message: String,
        /// Directory being searched
        path: Option<PathBuf>,
    },

    /// Acquisition file unreadable or corrupt
    #[error("Failed to load '{}': {message}", .path.display())]
    Load {
        /// Acquisition file
        path: PathBuf,
        /// Error description
        message: String,
    },

    /// Destination not writable
    #[error("Failed to write '{}': {message}", .path.display())]
    Write {
        /// Destination path
        path: PathBuf,
        /// Error description
        message: String,
        /// Underlying encoder or I/O error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Missing or inconsistent metadata records at the fan-in barrier
    #[error("Aggregation error: {message}")]
    Aggregation {
        /// Error description
        message: String,
        /// Tile file name of the offending record
        record: Option<String>,
    },

    /// Missing manifest, missing tile, malformed placement or no tiles
    #[error("Stitch error: {message}")]
    Stitch {
        /// Error description
        message: String,
        /// Manifest or tile path involved
        path: Option<PathBuf>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data type being serialized
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The run was cancelled before the stage could complete
    #[error("Pipeline cancelled during stage '{stage}'")]
    Cancelled {
        /// Stage that observed the cancellation
        stage: String,
    },

    /// Fatal error attributed to a pipeline stage and (optionally) an input file
    #[error("Pipeline failed at stage '{stage}'{}: {source}", input_suffix(.input))]
    StageFailed {
        /// Stage where the run halted
        stage: String,
        /// Input file that triggered the failure
        input: Option<PathBuf>,
        /// Underlying error
        #[source]
        source: Box<SerStitchError>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

fn input_suffix(input: &Option<PathBuf>) -> String {
    input
        .as_ref()
        .map(|path| format!(" (input '{}')", path.display()))
        .unwrap_or_default()
}

impl SerStitchError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new discovery error for a directory
    pub fn discovery(message: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::Discovery {
            message: message.into(),
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Create a new load error for an acquisition file
    pub fn load(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a new write error with an underlying cause
    pub fn write<E>(path: impl AsRef<Path>, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new aggregation error
    pub fn aggregation(message: impl Into<String>) -> Self {
        Self::Aggregation {
            message: message.into(),
            record: None,
        }
    }

    /// Create a new aggregation error naming the offending record
    pub fn aggregation_record(message: impl Into<String>, record: impl Into<String>) -> Self {
        Self::Aggregation {
            message: message.into(),
            record: Some(record.into()),
        }
    }

    /// Create a new stitch error
    pub fn stitch(message: impl Into<String>) -> Self {
        Self::Stitch {
            message: message.into(),
            path: None,
        }
    }

    /// Create a new stitch error for a manifest or tile path
    pub fn stitch_path(message: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::Stitch {
            message: message.into(),
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Create a new cancellation error
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Attribute an error to a pipeline stage and input
    pub fn stage_failed(stage: impl Into<String>, input: Option<PathBuf>, source: Self) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            input,
            source: Box::new(source),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Whether the error reports a cancelled run rather than a failed input
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::StageFailed { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Whether the error is confined to one input file. Only these may be
    /// skipped by a lenient failure policy; everything else halts the run.
    pub fn is_skippable(&self) -> bool {
        match self {
            Self::Load { .. } => true,
            Self::StageFailed { source, .. } => source.is_skippable(),
            _ => false,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Internal { context: ctx, .. } => {
                *ctx = Some(context.into());
            }
            Self::Io { message, .. } | Self::Serialization { message, .. } => {
                *message = format!("{}: {message}", context.into());
            }
            _ => {}
        }
        self
    }
}

impl From<io::Error> for SerStitchError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for SerStitchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for SerStitchError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<SerStitchError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failed_display_names_stage_and_input() {
        let err = SerStitchError::stage_failed(
            "exporting",
            Some(PathBuf::from("/data/b.ser")),
            SerStitchError::load("/data/b.ser", "truncated header"),
        );

        let display = err.to_string();
        assert!(display.contains("stage 'exporting'"));
        assert!(display.contains("/data/b.ser"));
        assert!(display.contains("truncated header"));
    }

    #[test]
    fn test_stage_failed_without_input() {
        let err = SerStitchError::stage_failed(
            "stitching",
            None,
            SerStitchError::stitch("no tiles"),
        );
        assert_eq!(
            err.to_string(),
            "Pipeline failed at stage 'stitching': Stitch error: no tiles"
        );
    }

    #[test]
    fn test_is_cancellation_sees_through_stage_failure() {
        let err = SerStitchError::stage_failed("exporting", None, SerStitchError::cancelled("exporting"));
        assert!(err.is_cancellation());
        assert!(!SerStitchError::aggregation("empty").is_cancellation());
    }

    #[test]
    fn test_only_load_errors_are_skippable() {
        assert!(SerStitchError::load("/data/a.ser", "truncated").is_skippable());
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!SerStitchError::write("/out/8bit/a.tif", "not writable", denied).is_skippable());
        assert!(!SerStitchError::internal("boom").is_skippable());
        assert!(!SerStitchError::cancelled("exporting").is_skippable());
    }

    #[test]
    fn test_with_context_on_io_prefixes_message() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = SerStitchError::io("open failed", io_err).with_context("writing manifest");

        if let SerStitchError::Io { message, source } = err {
            assert_eq!(message, "writing manifest: open failed");
            assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
        } else {
            panic!("Expected Io error");
        }
    }

    #[test]
    fn test_with_context_non_contextual_error() {
        let err = SerStitchError::config("Bad config").with_context("Should not change");

        if let SerStitchError::Config { message, .. } = err {
            assert_eq!(message, "Bad config");
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_result_ext_with_context() {
        let result: std::result::Result<i32, io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"));

        let err = result.with_context(|| "reading tile".to_string()).unwrap_err();
        assert!(matches!(err, SerStitchError::Io { .. }));
        assert!(err.to_string().contains("reading tile"));
    }

    #[test]
    fn test_from_yaml_error() {
        let yaml_err = serde_yaml::from_str::<i32>("invalid: yaml: content").unwrap_err();
        let err: SerStitchError = yaml_err.into();

        if let SerStitchError::Serialization { data_type, .. } = err {
            assert_eq!(data_type, Some("YAML".to_string()));
        } else {
            panic!("Expected Serialization error");
        }
    }

    #[test]
    fn test_write_error_keeps_source() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = SerStitchError::write("/out/8bit/a.tif", "encoding tile", io_err);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/out/8bit/a.tif"));
    }
}
