//! Locally produced backup files awaiting upload.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    DatabaseDump,
    CompressedGroup,
}

/// A finished local file. It exists on disk until local cleanup removes it,
/// or is left in place when a run fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub kind: ArtifactKind,
}

impl BackupArtifact {
    pub fn new(local_path: impl Into<PathBuf>, size_bytes: u64, kind: ArtifactKind) -> Self {
        Self {
            local_path: local_path.into(),
            size_bytes,
            kind,
        }
    }

    /// File name used for the remote entry.
    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.local_path.display().to_string())
    }
}

/// `2024-05-01T03:00:00.123Z` becomes `2024-05-01T03-00-00-123Z`, safe for
/// file names on every platform.
pub fn timestamp_suffix(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}
