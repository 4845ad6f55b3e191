//! Pipeline state machine.
//!
//! [`RunState`] carries the inputs of the stage about to run, so a transition
//! either hands the next stage exactly what it needs or lands in `Failed` with
//! a tagged [`StageFailure`]. [`PipelineState`] is the payload-free label used
//! in reports.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task_graph::Stage;
use crate::core::errors::SerStitchError;
use crate::core::metadata::{ExportMetadata, InputFile};
use crate::stitch::StitchedMosaic;

/// Label of a pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Selecting input files
    Discovering,
    /// Running per-file exports
    Exporting,
    /// Writing the manifest
    Aggregating,
    /// Composing the mosaic
    Stitching,
    /// Every stage completed
    Done,
    /// A stage failed or the run was cancelled
    Failed,
}

impl PipelineState {
    /// Stage executed while in this state
    pub fn stage(self) -> Option<Stage> {
        match self {
            Self::Discovering => Some(Stage::Discover),
            Self::Exporting => Some(Stage::Export),
            Self::Aggregating => Some(Stage::Aggregate),
            Self::Stitching => Some(Stage::Stitch),
            Self::Done | Self::Failed => None,
        }
    }

    /// No further transitions leave this state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discovering => "Discovering",
            Self::Exporting => "Exporting",
            Self::Aggregating => "Aggregating",
            Self::Stitching => "Stitching",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// A fatal error tagged with the stage and input that caused it.
#[derive(Debug)]
pub struct StageFailure {
    /// Stage that failed
    pub stage: Stage,
    /// Input file or artifact involved
    pub input: Option<PathBuf>,
    /// Underlying error
    pub error: SerStitchError,
}

impl StageFailure {
    /// Tag an error with its stage
    pub fn new(stage: Stage, input: Option<PathBuf>, error: SerStitchError) -> Self {
        Self { stage, input, error }
    }

    /// Convert into the error returned to callers
    pub fn into_error(self) -> SerStitchError {
        SerStitchError::stage_failed(self.stage.name(), self.input, self.error)
    }
}

/// Pipeline state together with the data the next stage consumes.
#[derive(Debug)]
pub enum RunState {
    /// Nothing discovered yet
    Discovering,
    /// Files waiting to be exported
    Exporting {
        /// Discovered acquisition files in discovery order
        files: Vec<InputFile>,
    },
    /// Every export finished; records wait at the fan-in barrier
    Aggregating {
        /// Records in discovery order
        records: Vec<ExportMetadata>,
        /// Number of records the barrier must observe
        expected: usize,
    },
    /// Manifests written and complete
    Stitching {
        /// Written manifest files
        manifests: Vec<PathBuf>,
    },
    /// Run finished
    Done {
        /// The mosaic, when stitching ran
        mosaic: Option<StitchedMosaic>,
    },
    /// Run halted
    Failed(StageFailure),
}

impl RunState {
    /// Payload-free label
    pub fn label(&self) -> PipelineState {
        match self {
            Self::Discovering => PipelineState::Discovering,
            Self::Exporting { .. } => PipelineState::Exporting,
            Self::Aggregating { .. } => PipelineState::Aggregating,
            Self::Stitching { .. } => PipelineState::Stitching,
            Self::Done { .. } => PipelineState::Done,
            Self::Failed(_) => PipelineState::Failed,
        }
    }

    /// Shorthand for a failed transition
    pub fn failed(stage: Stage, input: Option<PathBuf>, error: SerStitchError) -> Self {
        Self::Failed(StageFailure::new(stage, input, error))
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State left
    pub from: PipelineState,
    /// State entered
    pub to: PipelineState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}
