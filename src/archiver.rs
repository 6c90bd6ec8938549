//! File group compression stage.
//!
//! Each configured group is streamed into one `<group>-<timestamp>.tar.gz`
//! (gzip level 9). Groups are processed one at a time in name order; a group
//! whose paths all vanished is skipped, and a group that fails to compress
//! does not stop the others.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use flate2::{Compression, write::GzEncoder};
use tar::Builder;
use tracing::{error, info, warn};

use crate::{
    artifact::{ArtifactKind, BackupArtifact, timestamp_suffix},
    config::GroupsConfig,
    error::{BackupError, BackupResult},
    progress::{ProgressEstimator, ProgressEvent, ProgressFanout},
};

/// Size assumed for a directory; recursive sizing is skipped.
pub const DIRECTORY_ESTIMATE: u64 = 100 * 1024 * 1024;
/// Size assumed when a path cannot be stat'ed.
pub const UNKNOWN_ESTIMATE: u64 = 10 * 1024 * 1024;

/// Estimated input size of `paths`.
pub fn estimate_size(paths: &[PathBuf]) -> u64 {
    paths
        .iter()
        .map(|path| match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => DIRECTORY_ESTIMATE,
            Ok(meta) => meta.len(),
            Err(_) => UNKNOWN_ESTIMATE,
        })
        .sum()
}

/// Counts compressed bytes on their way to disk and reports a percent.
struct CountingWriter<W> {
    inner: W,
    estimator: ProgressEstimator,
    progress: ProgressFanout,
    label: String,
    last: u8,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        let percent = self.estimator.record(n as u64);
        if percent != self.last {
            self.last = percent;
            self.progress
                .update(&ProgressEvent::new(percent, self.label.as_str()));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct Archiver {
    output_dir: PathBuf,
    progress: ProgressFanout,
}

impl Archiver {
    pub fn new(output_dir: impl Into<PathBuf>, progress: ProgressFanout) -> Self {
        Self {
            output_dir: output_dir.into(),
            progress,
        }
    }

    /// Compress every non-empty group, one artifact per group.
    pub async fn compress_groups(&self, groups: &GroupsConfig) -> Vec<BackupArtifact> {
        if groups.is_empty() {
            info!("No file groups configured");
            return Vec::new();
        }

        let operation = format!("Compressing {} file groups", groups.len());
        self.progress.start(&operation);

        let timestamp = timestamp_suffix(Utc::now());
        let total = groups.len();
        let mut artifacts = Vec::new();
        let mut all_ok = true;

        for (i, (name, paths)) in groups.iter().enumerate() {
            let existing: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
            if existing.len() < paths.len() {
                warn!(
                    group = %name,
                    missing = paths.len() - existing.len(),
                    "Some group paths do not exist and are skipped"
                );
            }
            if existing.is_empty() {
                info!(group = %name, "No existing paths in group, skipping");
                continue;
            }

            let output = self.output_dir.join(format!("{name}-{timestamp}.tar.gz"));
            let label = format!("Compressing group {name} ({}/{total})", i + 1);
            match self.compress(existing, output, label).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    all_ok = false;
                    error!(group = %name, error = %e, "Group compression failed");
                    self.progress
                        .failure(&format!("Compression of group {name}"), &e.to_string());
                }
            }
        }

        self.progress.end(&operation, all_ok);
        artifacts
    }

    async fn compress(
        &self,
        paths: Vec<PathBuf>,
        output: PathBuf,
        label: String,
    ) -> BackupResult<BackupArtifact> {
        let progress = self.progress.clone();
        let unit = label.clone();
        progress.update(&ProgressEvent::new(0, label.as_str()));

        let result = tokio::task::spawn_blocking(move || {
            let estimator = ProgressEstimator::with_total(estimate_size(&paths));
            write_archive(&paths, &output, estimator, progress, label)
                .map(|size| BackupArtifact::new(output, size, ArtifactKind::CompressedGroup))
        })
        .await
        .map_err(|e| BackupError::process(&unit, format!("compression task failed: {e}")))?;

        let artifact = result.map_err(|e| BackupError::process(&unit, e.to_string()))?;
        self.progress
            .update(&ProgressEvent::new(100, unit.as_str()).with_detail("done"));
        info!(
            path = %artifact.local_path.display(),
            size_mb = format!("{:.2}", artifact.size_bytes as f64 / 1024.0 / 1024.0),
            "Archive written"
        );
        Ok(artifact)
    }
}

/// Write `paths` into a gzip'd tar at `output`. Entries are stored under
/// their base name; directories recursively. Returns the archive size.
fn write_archive(
    paths: &[PathBuf],
    output: &Path,
    estimator: ProgressEstimator,
    progress: ProgressFanout,
    label: String,
) -> io::Result<u64> {
    let file = File::create(output)?;
    let counting = CountingWriter {
        inner: BufWriter::new(file),
        estimator,
        progress,
        label,
        last: 0,
    };
    let encoder = GzEncoder::new(counting, Compression::best());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    for path in paths {
        let name = path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| io::Error::other(format!("{} has no file name", path.display())))?;
        if path.is_dir() {
            builder.append_dir_all(&name, path)?;
        } else {
            builder.append_path_with_name(path, &name)?;
        }
    }

    let encoder = builder.into_inner()?;
    let mut counting = encoder.finish()?;
    counting.flush()?;
    Ok(counting.estimator.processed())
}
