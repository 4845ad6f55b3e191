//! Pipeline driver that runs discover → export → aggregate → stitch.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::{FailurePolicy, SerStitchConfig};
use crate::core::errors::{Result, SerStitchError};
use crate::core::metadata::{ExportMetadata, InputFile};
use crate::io::persistence::{remove_stale, write_json_atomic};
use crate::stitch::{CompositorOptions, StitchedMosaic};

use super::export_stage::{export_file, ExportContext};
use super::fan_out::{FanOutPolicy, TaskOutcome, WorkerPool};
use super::pipeline_results::{FailureSummary, PipelineReport, SkippedFile};
use super::run_state::{PipelineState, RunState};
use super::services::{
    AcquisitionLoader, FijiManifestWriter, FileDiscoverer, GlobFileDiscoverer, ManifestWriter,
    PlacementStitcher, SerAcquisitionLoader, TiffTileExporter, TileExporter, TileStitcher,
};
use super::task_graph::{Stage, TaskGraph};

/// Progress callback function type
pub type ProgressCallback = Box<dyn Fn(&str, f64) + Send + Sync>;

/// File name of the metadata sidecar written under the output root
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Outcome of one pipeline execution: the report plus the mosaic or the
/// stage-tagged error that halted the run.
#[derive(Debug)]
pub struct PipelineRun {
    /// Run report, complete for both outcomes
    pub report: PipelineReport,
    /// The mosaic (when stitching ran) or the fatal error
    pub outcome: Result<Option<StitchedMosaic>>,
}

impl PipelineRun {
    /// Drop the mosaic handle and keep the report, or surface the error
    pub fn into_result(self) -> Result<PipelineReport> {
        self.outcome.map(|_| self.report)
    }
}

/// Export-and-stitch pipeline over one input directory
#[derive(Clone)]
pub struct ExportStitchPipeline {
    input_dir: PathBuf,
    save_dir: PathBuf,
    config: SerStitchConfig,
    graph: TaskGraph,
    pool: Arc<WorkerPool>,
    cancel: CancellationToken,
    discoverer: Arc<dyn FileDiscoverer>,
    loader: Arc<dyn AcquisitionLoader>,
    exporter: Arc<dyn TileExporter>,
    manifest_writer: Arc<dyn ManifestWriter>,
    stitcher: Arc<dyn TileStitcher>,
    progress: Option<Arc<ProgressCallback>>,
}

impl ExportStitchPipeline {
    /// Create a pipeline with the default collaborators
    pub fn new(
        input_dir: impl Into<PathBuf>,
        save_dir: impl Into<PathBuf>,
        config: SerStitchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.performance.worker_threads)?;
        let stitcher = PlacementStitcher::shared(CompositorOptions {
            fusion: config.stitch.fusion,
            max_mosaic_pixels: config.stitch.max_mosaic_pixels,
            default_output_filename: config.stitch.output_filename.clone(),
        });

        Ok(Self {
            input_dir: input_dir.into(),
            save_dir: save_dir.into(),
            graph: TaskGraph::export_and_stitch(config.stitch.enabled),
            pool: Arc::new(pool),
            cancel: CancellationToken::new(),
            discoverer: GlobFileDiscoverer::shared(),
            loader: SerAcquisitionLoader::shared(),
            exporter: TiffTileExporter::shared(),
            manifest_writer: FijiManifestWriter::shared(config.manifest.coordinate_precision),
            stitcher,
            progress: None,
            config,
        })
    }

    pub fn with_discoverer(mut self, discoverer: Arc<dyn FileDiscoverer>) -> Self {
        self.discoverer = discoverer;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn AcquisitionLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_tile_exporter(mut self, exporter: Arc<dyn TileExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_manifest_writer(mut self, writer: Arc<dyn ManifestWriter>) -> Self {
        self.manifest_writer = writer;
        self
    }

    pub fn with_stitcher(mut self, stitcher: Arc<dyn TileStitcher>) -> Self {
        self.stitcher = stitcher;
        self
    }

    /// Receive `(message, percent)` updates while the run progresses
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Token that cancels the run cooperatively when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration the pipeline runs with
    pub fn config(&self) -> &SerStitchConfig {
        &self.config
    }

    /// Stage dependency graph of this run
    pub fn task_graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run the pipeline, returning the report or the stage-tagged error
    pub async fn run(&self) -> Result<PipelineReport> {
        self.execute().await.into_result()
    }

    /// Run the pipeline on a blocking thread so the async runtime stays responsive
    pub async fn execute(&self) -> PipelineRun {
        let pipeline = self.clone();
        match tokio::task::spawn_blocking(move || pipeline.execute_blocking()).await {
            Ok(run) => run,
            Err(join_error) => {
                let error = SerStitchError::internal(format!("pipeline worker panicked: {join_error}"));
                error!("{error}");
                let mut report = PipelineReport::new(&self.input_dir, &self.save_dir);
                report.failure = Some(FailureSummary {
                    stage: Stage::Discover,
                    input: None,
                    message: error.to_string(),
                    cancelled: false,
                });
                report.record_transition(PipelineState::Discovering, PipelineState::Failed);
                PipelineRun {
                    report,
                    outcome: Err(error),
                }
            }
        }
    }

    /// Run the pipeline on the current thread
    pub fn execute_blocking(&self) -> PipelineRun {
        let mut report = PipelineReport::new(&self.input_dir, &self.save_dir);
        let cancel = self.cancel.child_token();
        let mut completed: HashSet<Stage> = HashSet::new();
        let mut state = RunState::Discovering;

        info!(
            "Starting run {}: {} -> {}",
            report.run_id,
            self.input_dir.display(),
            self.save_dir.display()
        );
        debug!("Stage order: {:?}", self.graph.execution_order());

        let outcome = loop {
            let from = state.label();
            let stage = match state {
                RunState::Done { mosaic } => break Ok(mosaic),
                RunState::Failed(failure) => {
                    error!("{}", failure.error);
                    report.failure = Some(FailureSummary::from(&failure));
                    break Err(failure.into_error());
                }
                ref pending => match pending.label().stage() {
                    Some(stage) => stage,
                    None => break Err(SerStitchError::internal("non-terminal state without a stage")),
                },
            };

            let started = Instant::now();
            let next = if !self.graph.is_ready(stage, &completed) {
                RunState::failed(
                    stage,
                    None,
                    SerStitchError::internal(format!("stage '{stage}' entered before its prerequisites")),
                )
            } else if cancel.is_cancelled() {
                RunState::failed(stage, None, SerStitchError::cancelled(stage.name()))
            } else {
                match state {
                    RunState::Discovering => self.discover(&mut report),
                    RunState::Exporting { files } => self.export_all(files, &cancel, &mut report),
                    RunState::Aggregating { records, expected } => {
                        self.aggregate(records, expected, &mut report)
                    }
                    RunState::Stitching { manifests } => self.stitch(&manifests, &mut report),
                    RunState::Done { .. } | RunState::Failed(_) => continue,
                }
            };
            report
                .stage_timings
                .insert(stage, started.elapsed().as_secs_f64());

            if !matches!(next, RunState::Failed(_)) {
                completed.insert(stage);
            }
            let to = next.label();
            info!("Run {}: {from} -> {to}", report.run_id);
            report.record_transition(from, to);
            state = next;
        };

        match &outcome {
            Ok(_) => {
                self.notify("Pipeline complete", 100.0);
                info!(
                    "Run {} completed in {:.2}s",
                    report.run_id,
                    report.duration_secs().unwrap_or_default()
                );
            }
            Err(_) => self.notify("Pipeline failed", 100.0),
        }
        PipelineRun { report, outcome }
    }

    fn notify(&self, message: &str, percent: f64) {
        if let Some(callback) = &self.progress {
            callback(message, percent);
        }
    }

    fn discover(&self, report: &mut PipelineReport) -> RunState {
        self.notify("Discovering acquisition files...", 0.0);
        match self
            .discoverer
            .discover(&self.input_dir, &self.config.pipeline.filename_filter)
        {
            Ok(files) => {
                report.statistics.files_discovered = files.len();
                if let Err(e) = ensure_unique_stems(&files) {
                    return RunState::failed(Stage::Discover, Some(self.input_dir.clone()), e);
                }
                RunState::Exporting { files }
            }
            Err(e) => RunState::failed(Stage::Discover, Some(self.input_dir.clone()), e),
        }
    }

    fn export_context(&self) -> ExportContext {
        ExportContext {
            save_dir: self.save_dir.clone(),
            intensity_range: self.config.pipeline.intensity_range,
            layout: self.config.export.clone(),
            loader: Arc::clone(&self.loader),
            exporter: Arc::clone(&self.exporter),
        }
    }

    /// Outputs of a previous run that would disagree with this run's tiles.
    fn stale_outputs(&self) -> Vec<PathBuf> {
        let mut stale: Vec<PathBuf> = self
            .config
            .manifest
            .prefixes
            .iter()
            .map(|prefix| self.save_dir.join(prefix).join(&self.config.manifest.filename))
            .collect();
        stale.push(self.save_dir.join(METADATA_FILE_NAME));
        stale.push(self.mosaic_path());
        stale
    }

    fn mosaic_path(&self) -> PathBuf {
        self.config.stitch.save_path.clone().unwrap_or_else(|| {
            self.save_dir
                .join(&self.config.stitch.tiles_prefix)
                .join(&self.config.stitch.output_filename)
        })
    }

    fn export_all(
        &self,
        files: Vec<InputFile>,
        cancel: &CancellationToken,
        report: &mut PipelineReport,
    ) -> RunState {
        for path in self.stale_outputs() {
            match remove_stale(&path) {
                Ok(true) => debug!("Removed stale output {}", path.display()),
                Ok(false) => {}
                Err(e) => return RunState::failed(Stage::Export, None, e),
            }
        }

        let total = files.len();
        self.notify(&format!("Exporting {total} file(s)..."), 5.0);
        info!(
            "Exporting {total} file(s) on {} worker thread(s)",
            self.pool.threads()
        );

        let ctx = self.export_context();
        let policy = FanOutPolicy {
            fail_fast: self.config.pipeline.failure_policy == FailurePolicy::FailFast,
            retries: self.config.pipeline.export_retries,
        };
        // Counting and reporting under one lock keeps progress monotonic.
        let finished = Mutex::new(0usize);
        let outcomes = self.pool.map(&files, policy, cancel, |file| {
            let result = export_file(file, &ctx);
            if let Ok(mut done) = finished.lock() {
                *done += 1;
                self.notify(
                    &format!("Exported {}/{total}", *done),
                    5.0 + 80.0 * *done as f64 / total.max(1) as f64,
                );
            }
            result
        });

        let mut records: Vec<ExportMetadata> = Vec::with_capacity(total);
        let mut first_failure: Option<(PathBuf, SerStitchError)> = None;
        for (file, outcome) in files.iter().zip(outcomes) {
            report.statistics.export_retries += outcome.attempts().saturating_sub(1);
            match outcome {
                TaskOutcome::Completed { value, .. } => records.push(value),
                TaskOutcome::Failed { error, .. } => {
                    report.statistics.files_failed += 1;
                    if policy.fail_fast || !error.is_skippable() {
                        if first_failure.is_none() {
                            first_failure = Some((file.path().to_path_buf(), error));
                        }
                    } else {
                        warn!("Skipping {}: {error}", file.path().display());
                        report.skipped_files.push(SkippedFile {
                            input: file.path().to_path_buf(),
                            error: error.to_string(),
                        });
                    }
                }
                TaskOutcome::Skipped => report.statistics.files_cancelled += 1,
            }
        }
        report.statistics.files_exported = records.len();

        if let Some((input, error)) = first_failure {
            return RunState::failed(Stage::Export, Some(input), error);
        }
        if report.statistics.files_cancelled > 0 || cancel.is_cancelled() {
            return RunState::failed(Stage::Export, None, SerStitchError::cancelled(Stage::Export.name()));
        }

        let expected = total - report.skipped_files.len();
        RunState::Aggregating { records, expected }
    }

    fn aggregate(
        &self,
        records: Vec<ExportMetadata>,
        expected: usize,
        report: &mut PipelineReport,
    ) -> RunState {
        self.notify("Writing tile manifest...", 90.0);
        if records.len() != expected {
            return RunState::failed(
                Stage::Aggregate,
                None,
                SerStitchError::aggregation(format!(
                    "fan-in barrier observed {} of {expected} export records",
                    records.len()
                )),
            );
        }

        let metadata_path = self.save_dir.join(METADATA_FILE_NAME);
        if let Err(e) = write_json_atomic(&metadata_path, &records) {
            return RunState::failed(Stage::Aggregate, Some(metadata_path), e);
        }
        report.metadata_file = Some(metadata_path);

        match self.manifest_writer.write_manifest(
            &records,
            &self.save_dir,
            &self.config.manifest.prefixes,
            &self.config.manifest.filename,
        ) {
            Ok(manifests) => {
                report.statistics.manifest_rows = records.len();
                report.manifests = manifests.clone();
                if self.graph.contains(Stage::Stitch) {
                    RunState::Stitching { manifests }
                } else {
                    info!("Stitching disabled; stopping after aggregation");
                    RunState::Done { mosaic: None }
                }
            }
            Err(e) => {
                let input = match &e {
                    SerStitchError::Aggregation {
                        record: Some(name), ..
                    } => records
                        .iter()
                        .find(|record| &record.image_file_name == name)
                        .map(|record| record.source_file.clone()),
                    _ => None,
                };
                RunState::failed(Stage::Aggregate, input, e)
            }
        }
    }

    fn stitch(&self, manifests: &[PathBuf], report: &mut PipelineReport) -> RunState {
        self.notify("Stitching mosaic...", 95.0);
        let tiles_dir = self.save_dir.join(&self.config.stitch.tiles_prefix);
        let manifest_path = tiles_dir.join(&self.config.manifest.filename);

        if !manifests.contains(&manifest_path) || !manifest_path.is_file() {
            return RunState::failed(
                Stage::Stitch,
                Some(manifest_path.clone()),
                SerStitchError::stitch_path("manifest for the stitched tiles was not written", &manifest_path),
            );
        }

        match self.stitcher.stitch(
            &tiles_dir,
            &self.config.manifest.filename,
            self.config.stitch.save_path.as_deref(),
        ) {
            Ok(mosaic) => {
                report.mosaic = Some(mosaic.clone());
                RunState::Done {
                    mosaic: Some(mosaic),
                }
            }
            Err(e) => {
                let input = match &e {
                    SerStitchError::Stitch { path, .. } => path.clone(),
                    _ => None,
                };
                RunState::failed(Stage::Stitch, input, e)
            }
        }
    }
}

/// Every derived output is named after the input stem, so two inputs sharing
/// a stem would race for the same tiles.
fn ensure_unique_stems(files: &[InputFile]) -> Result<()> {
    let mut seen: HashMap<String, &Path> = HashMap::with_capacity(files.len());
    for file in files {
        // Files without a usable stem fail individually during export.
        let Ok(stem) = file.stem() else { continue };
        if let Some(first) = seen.insert(stem.clone(), file.path()) {
            return Err(SerStitchError::discovery(
                format!(
                    "'{}' and '{}' share the stem '{stem}' and would overwrite each other's tiles",
                    first.display(),
                    file.path().display()
                ),
                file.path(),
            ));
        }
    }
    Ok(())
}

/// Run the pipeline with the default configuration, overriding the filename
/// filter and the intensity range when given.
pub async fn export_and_stitch(
    input_dir: &Path,
    save_dir: &Path,
    filename_filter: Option<&str>,
    intensity_range: Option<NonZeroU32>,
) -> Result<PipelineReport> {
    let mut config = SerStitchConfig::default();
    if let Some(filter) = filename_filter {
        config.pipeline.filename_filter = filter.to_string();
    }
    if let Some(range) = intensity_range {
        config.pipeline.intensity_range = range;
    }
    ExportStitchPipeline::new(input_dir, save_dir, config)?
        .run()
        .await
}

#[cfg(test)]
#[path = "pipeline_executor_tests.rs"]
mod tests;
