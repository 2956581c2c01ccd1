// 🚨 Error taxonomy surfaced to callers
// Input errors and schema errors are fatal; everything else is a processing failure.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A declared input source does not exist.
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// None of the configured identity columns is present in the merged schema.
    #[error("no identity column found (looked for: {})", candidates.join(", "))]
    MissingIdentityColumn { candidates: Vec<String> },

    /// Anything else: unreadable tables, bad date overrides, write failures.
    #[error(transparent)]
    ProcessingFailure(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Process exit code used by the CLI shell.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconcileError::SourceNotFound { .. } => 2,
            ReconcileError::MissingIdentityColumn { .. } => 3,
            ReconcileError::ProcessingFailure(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
