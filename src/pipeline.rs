// 🔁 Run Pipeline
// Loading -> Validating -> Reconciling -> Annotating -> Done, strictly in order.
// Any failing stage ends the run in Failed, carrying the error. The artifact
// is written last and all-or-nothing, so a failed run never leaves output behind.

use crate::annotate::{annotate, AnnotatedTable, Mark};
use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, Result};
use crate::export::{write_artifact, ExportSummary};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::snapshot::{Snapshot, SnapshotLoader, SnapshotSource};
use crate::structure::{validate_structure, StructureVerdict};
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, info_span};

/// Minimum number of snapshots a run compares.
pub const MIN_SOURCES: usize = 2;

// ============================================================================
// RUN STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Loading,
    Validating,
    Reconciling,
    Annotating,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Loading => "loading",
            RunStage::Validating => "validating",
            RunStage::Reconciling => "reconciling",
            RunStage::Annotating => "annotating",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A run that ended in `Failed`. `stage` is where it failed.
#[derive(Debug, Error)]
#[error("{stage} failed")]
pub struct RunFailure {
    pub stage: RunStage,
    #[source]
    pub error: ReconcileError,
}

// ============================================================================
// REQUEST / REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Inputs in ingestion order
    pub sources: Vec<SnapshotSource>,
    /// Source id -> YYYY/MM/DD
    pub date_overrides: HashMap<String, String>,
    pub output: PathBuf,
    pub config: ReconcileConfig,
}

impl RunRequest {
    pub fn new(sources: Vec<SnapshotSource>, output: impl Into<PathBuf>) -> Self {
        RunRequest {
            sources,
            date_overrides: HashMap::new(),
            output: output.into(),
            config: ReconcileConfig::default(),
        }
    }

    pub fn with_date(mut self, source_id: impl Into<String>, date: impl Into<String>) -> Self {
        self.date_overrides.insert(source_id.into(), date.into());
        self
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub sequence: usize,
    pub source: String,
    pub snapshot_date: String,
    pub rows: usize,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        SnapshotSummary {
            sequence: snapshot.sequence(),
            source: snapshot.source().to_string(),
            snapshot_date: snapshot.snapshot_date().to_string(),
            rows: snapshot.rows().len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub snapshots: Vec<SnapshotSummary>,
    pub structure: StructureVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_column: Option<String>,
    pub rows_emitted: usize,
    pub changed_identities: usize,
    pub changed_cells: usize,
    pub inconsistent_cells: usize,
    pub artifact: ExportSummary,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} snapshots, {}, {} rows emitted, {} identities changed",
            self.snapshots.len(),
            self.structure.summary(),
            self.rows_emitted,
            self.changed_identities
        )
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

type StageObserver<'a> = Box<dyn FnMut(RunStage) -> ControlFlow<()> + 'a>;

/// One run. Owns nothing shared: every run builds its own working set.
pub struct Pipeline<'a> {
    stage: RunStage,
    observer: Option<StageObserver<'a>>,
}

impl<'a> Default for Pipeline<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Pipeline<'a> {
    pub fn new() -> Self {
        Pipeline {
            stage: RunStage::Loading,
            observer: None,
        }
    }

    /// Called on entry to every stage. Returning `Break` aborts the run
    /// before that stage starts.
    pub fn with_observer(mut self, observer: impl FnMut(RunStage) -> ControlFlow<()> + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn run(&mut self, request: &RunRequest) -> std::result::Result<RunReport, RunFailure> {
        let span = info_span!("run", sources = request.sources.len(), output = %request.output.display());
        let _guard = span.enter();

        match self.execute(request) {
            Ok(report) => {
                self.stage = RunStage::Done;
                self.notify(RunStage::Done);
                info!("{}", report.summary());
                Ok(report)
            }
            Err(error) => {
                let failure = RunFailure {
                    stage: self.stage,
                    error,
                };
                self.stage = RunStage::Failed;
                self.notify(RunStage::Failed);
                Err(failure)
            }
        }
    }

    fn execute(&mut self, request: &RunRequest) -> Result<RunReport> {
        self.enter(RunStage::Loading)?;
        let snapshots = load(request)?;

        self.enter(RunStage::Validating)?;
        let structure = validate_structure(&snapshots);

        self.enter(RunStage::Reconciling)?;
        let reconciliation = Reconciler::new(&request.config).reconcile(&snapshots, &structure)?;

        self.enter(RunStage::Annotating)?;
        let table = annotate(&reconciliation, &request.config);
        let artifact = write_artifact(&table, &request.output, &request.config.colors)?;

        Ok(build_report(&snapshots, structure, &reconciliation, &table, artifact))
    }

    fn enter(&mut self, stage: RunStage) -> Result<()> {
        self.stage = stage;
        if let Some(observer) = self.observer.as_mut() {
            if observer(stage).is_break() {
                return Err(anyhow!("run aborted before {}", stage).into());
            }
        }
        Ok(())
    }

    fn notify(&mut self, stage: RunStage) {
        if let Some(observer) = self.observer.as_mut() {
            let _ = observer(stage);
        }
    }
}

fn load(request: &RunRequest) -> Result<Vec<Snapshot>> {
    if request.sources.len() < MIN_SOURCES {
        return Err(anyhow!(
            "at least {} sources are required, got {}",
            MIN_SOURCES,
            request.sources.len()
        )
        .into());
    }

    let loader = SnapshotLoader::with_date_overrides(&request.date_overrides)?;
    loader.load_all(&request.sources)
}

fn build_report(
    snapshots: &[Snapshot],
    structure: StructureVerdict,
    reconciliation: &Reconciliation,
    table: &AnnotatedTable,
    artifact: ExportSummary,
) -> RunReport {
    RunReport {
        snapshots: snapshots.iter().map(SnapshotSummary::from).collect(),
        structure,
        identity_column: reconciliation.identity_column().map(str::to_string),
        rows_emitted: table.rows.len(),
        changed_identities: reconciliation.changed_count(),
        changed_cells: table.count_marks(Mark::Changed),
        inconsistent_cells: table.count_marks(Mark::Inconsistent),
        artifact,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_source(dir: &TempDir, name: &str, content: &str) -> SnapshotSource {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        SnapshotSource::new(path)
    }

    #[test]
    fn test_stages_run_in_order() {
        let dir = TempDir::new().unwrap();
        let a = write_source(&dir, "a.csv", "Project Name,Budget\nAcme,1\n");
        let b = write_source(&dir, "b.csv", "Project Name,Budget\nAcme,2\n");
        let request = RunRequest::new(vec![a.clone(), b.clone()], dir.path().join("out.csv"))
            .with_date(a.id, "2024/01/01")
            .with_date(b.id, "2024/02/01");

        let mut seen = Vec::new();
        let report = Pipeline::new()
            .with_observer(|stage| {
                seen.push(stage);
                ControlFlow::Continue(())
            })
            .run(&request)
            .unwrap();

        assert_eq!(report.changed_identities, 1);
        assert_eq!(report.identity_column.as_deref(), Some("Project Name"));
        assert_eq!(
            seen,
            vec![
                RunStage::Loading,
                RunStage::Validating,
                RunStage::Reconciling,
                RunStage::Annotating,
                RunStage::Done
            ]
        );
    }

    #[test]
    fn test_abort_between_stages_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let a = write_source(&dir, "a.csv", "Project Name\nAcme\n");
        let b = write_source(&dir, "b.csv", "Project Name\nAcme\n");
        let output = dir.path().join("out.csv");
        let request = RunRequest::new(vec![a, b], &output);

        let mut pipeline = Pipeline::new().with_observer(|stage| {
            if stage == RunStage::Reconciling {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        let failure = pipeline.run(&request).unwrap_err();

        assert_eq!(failure.stage, RunStage::Reconciling);
        assert_eq!(pipeline.stage(), RunStage::Failed);
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_identity_fails_at_reconciling() {
        let dir = TempDir::new().unwrap();
        let a = write_source(&dir, "a.csv", "Site\nX\n");
        let b = write_source(&dir, "b.csv", "Site\nX\n");
        let output = dir.path().join("out.csv");

        let failure = Pipeline::new()
            .run(&RunRequest::new(vec![a, b], &output))
            .unwrap_err();

        assert_eq!(failure.stage, RunStage::Reconciling);
        assert!(matches!(failure.error, ReconcileError::MissingIdentityColumn { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_single_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let a = write_source(&dir, "a.csv", "Project Name\nAcme\n");

        let failure = Pipeline::new()
            .run(&RunRequest::new(vec![a], dir.path().join("out.csv")))
            .unwrap_err();

        assert_eq!(failure.stage, RunStage::Loading);
        assert!(matches!(failure.error, ReconcileError::ProcessingFailure(_)));
    }

    #[test]
    fn test_failed_write_leaves_no_partial_artifact() {
        let dir = TempDir::new().unwrap();
        let a = write_source(&dir, "a.csv", "Project Name,Budget\nAcme,1\n");
        let b = write_source(&dir, "b.csv", "Project Name,Budget\nAcme,2\n");
        let output = dir.path().join("out.csv");
        fs::create_dir(&output).unwrap();

        let failure = Pipeline::new()
            .run(&RunRequest::new(vec![a, b], &output))
            .unwrap_err();

        assert_eq!(failure.stage, RunStage::Annotating);
        assert!(!dir.path().join("out.csv.marks.json").exists());

        let rendered = format!("{:#}", anyhow::Error::new(failure));
        assert!(rendered.starts_with("annotating failed: Failed to persist"));
        assert_eq!(rendered.matches("Failed to persist").count(), 1);
    }
}
