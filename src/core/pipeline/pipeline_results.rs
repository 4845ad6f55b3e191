//! Run report produced by the export-and-stitch pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run_state::{PipelineState, StageFailure, StateTransition};
use super::task_graph::Stage;
use crate::core::errors::Result;
use crate::io::persistence::write_json_atomic;
use crate::stitch::StitchedMosaic;

/// File name of the report written next to the outputs
pub const REPORT_FILE_NAME: &str = "pipeline_report.json";

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique identifier for this run
    pub run_id: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Directory the acquisitions were read from
    pub input_dir: PathBuf,
    /// Output root
    pub save_dir: PathBuf,
    /// Terminal state
    pub final_state: PipelineState,
    /// Every state change in order
    pub transitions: Vec<StateTransition>,
    /// Wall-clock seconds spent per stage
    pub stage_timings: BTreeMap<Stage, f64>,
    /// Counters
    pub statistics: RunStatistics,
    /// Exports dropped under the skip policy
    pub skipped_files: Vec<SkippedFile>,
    /// Manifests written by the aggregator
    pub manifests: Vec<PathBuf>,
    /// Metadata sidecar
    pub metadata_file: Option<PathBuf>,
    /// Composed mosaic
    pub mosaic: Option<StitchedMosaic>,
    /// Why the run failed
    pub failure: Option<FailureSummary>,
}

/// Run counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Files selected by discovery
    pub files_discovered: usize,
    /// Files exported successfully
    pub files_exported: usize,
    /// Files whose export failed
    pub files_failed: usize,
    /// Files never started because the run was cancelled
    pub files_cancelled: usize,
    /// Export attempts beyond the first
    pub export_retries: usize,
    /// Rows per written manifest
    pub manifest_rows: usize,
}

/// An export failure tolerated by the skip policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    /// Input file
    pub input: PathBuf,
    /// Error message
    pub error: String,
}

/// Serializable description of a [`StageFailure`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Stage that failed
    pub stage: Stage,
    /// Input that triggered the failure
    pub input: Option<PathBuf>,
    /// Error message
    pub message: String,
    /// The run was cancelled rather than failed by an input
    pub cancelled: bool,
}

impl From<&StageFailure> for FailureSummary {
    fn from(failure: &StageFailure) -> Self {
        Self {
            stage: failure.stage,
            input: failure.input.clone(),
            message: failure.error.to_string(),
            cancelled: failure.error.is_cancellation(),
        }
    }
}

impl PipelineReport {
    /// Report for a run that has just started
    pub fn new(input_dir: &Path, save_dir: &Path) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            input_dir: input_dir.to_path_buf(),
            save_dir: save_dir.to_path_buf(),
            final_state: PipelineState::Discovering,
            transitions: Vec::new(),
            stage_timings: BTreeMap::new(),
            statistics: RunStatistics::default(),
            skipped_files: Vec::new(),
            manifests: Vec::new(),
            metadata_file: None,
            mosaic: None,
            failure: None,
        }
    }

    /// Whether the run reached `Done`
    pub fn succeeded(&self) -> bool {
        self.final_state == PipelineState::Done
    }

    /// Total wall-clock seconds
    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Record a state change
    pub fn record_transition(&mut self, from: PipelineState, to: PipelineState) {
        self.transitions.push(StateTransition {
            from,
            to,
            at: Utc::now(),
        });
        self.final_state = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}
