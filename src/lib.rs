// Snapshot Reconcile - Core Library
// Loader -> Structure Validator -> Reconciler -> Annotator, plus artifact export.
// Used by the CLI binary and by integration tests.

pub mod error;
pub mod config;
pub mod snapshot;   // Snapshot Loader
pub mod structure;  // Structure Validator
pub mod reconcile;  // Reconciliation Engine
pub mod annotate;   // Cell marks
pub mod export;     // Artifact persistence
pub mod pipeline;   // Run state machine

// Re-export commonly used types
pub use error::{ReconcileError, Result};
pub use config::{MarkColors, ReconcileConfig, SEQ_COLUMN, SNAPSHOT_DATE_COLUMN};
pub use snapshot::{Cell, Snapshot, SnapshotLoader, SnapshotSource};
pub use structure::{validate_structure, MismatchKind, StructureVerdict};
pub use reconcile::{
    ChangeSet, DegradedCollection, IdentityGroup, MergedCollection, MergedRecord,
    Reconciler, Reconciliation,
};
pub use annotate::{annotate, AnnotatedTable, CellMark, Mark};
pub use export::{write_artifact, ArtifactFormat, ExportSummary};
pub use pipeline::{Pipeline, RunFailure, RunReport, RunRequest, RunStage, SnapshotSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
