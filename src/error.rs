//! Error taxonomy for a backup run.
//!
//! Stage-internal, per-item failures are logged and skipped by the stage that
//! hit them. Only the variants that end a run travel up to the orchestrator and
//! end up attached to a failed [`RunResult`](crate::orchestrator::RunResult).

use std::path::PathBuf;

use thiserror::Error;

use crate::{auth::AuthError, store::StoreError};

/// How a failed transfer should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// Credential expired or was rejected; retry once after a refresh.
    Auth,
    /// The destination folder does not exist; retry once against the store root.
    Destination,
    /// Anything else. Never retried.
    Terminal,
}

/// An upload that did not complete.
#[derive(Debug, Error)]
#[error("Upload of {path} failed ({kind:?}): {source}")]
pub struct TransferError {
    pub path: PathBuf,
    pub kind: TransferErrorKind,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum BackupError {
    /// Missing credentials or destination folder. Detected before any side effect.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external export or compression step exited unsuccessfully.
    #[error("Process for {unit} failed: {reason}")]
    Process { unit: String, reason: String },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A remote entry was already gone when we tried to delete it.
    #[error("Remote entry not found: {0}")]
    NotFound(String),

    /// Exporting and compressing produced nothing to upload.
    #[error("No backup artifacts were produced")]
    EmptyResult,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub(crate) fn process(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Process {
            unit: unit.into(),
            reason: reason.into(),
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
