//! Filesystem-backed remote store.
//!
//! Treats a directory (typically a mounted network share or a sync client's
//! folder) as the remote. Folder ids map to sub-directories of the root and
//! are never created implicitly, so a mistyped folder id surfaces as
//! [`StoreError::DestinationNotFound`] just like it would against a cloud API.

use std::{
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::{Destination, RemoteEntry, RemoteStore, StoreError, StoreResult, Upload};
use crate::auth::Credential;

const PARTIAL_SUFFIX: &str = ".partial";

pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StoreError::Backend(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Reject anything that would escape the root.
    fn checked_relative(value: &str) -> StoreResult<&Path> {
        let path = Path::new(value);
        let safe = !value.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if safe {
            Ok(path)
        } else {
            Err(StoreError::Backend(format!("invalid path component: {value}")))
        }
    }

    fn dir_for(&self, destination: &Destination) -> StoreResult<PathBuf> {
        match destination {
            Destination::Root => Ok(self.root.clone()),
            Destination::Folder(id) => Ok(self.root.join(Self::checked_relative(id)?)),
        }
    }

    fn id_for(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Creation time as seen by the store. Files are written once and renamed
/// into place, so the modification time is the upload time.
fn created_at(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .into()
}

#[async_trait]
impl RemoteStore for FilesystemStore {
    #[instrument(skip(self, _credential))]
    async fn list(
        &self,
        _credential: &Credential,
        destination: &Destination,
        name_filter: Option<&str>,
    ) -> StoreResult<Vec<RemoteEntry>> {
        let dir = self.dir_for(destination)?;
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::DestinationNotFound(destination.to_string()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            let metadata = item.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = item.file_name().to_string_lossy().to_string();
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            if let Some(filter) = name_filter
                && !name.contains(filter)
            {
                continue;
            }
            entries.push(RemoteEntry {
                id: self.id_for(&item.path()),
                name,
                created_at: created_at(&metadata),
                size_bytes: Some(metadata.len()),
            });
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!(count = entries.len(), dir = %dir.display(), "Listed store folder");
        Ok(entries)
    }

    #[instrument(skip(self, _credential, upload), fields(name = %upload.name, size = upload.size_bytes))]
    async fn create(
        &self,
        _credential: &Credential,
        destination: &Destination,
        mut upload: Upload,
    ) -> StoreResult<RemoteEntry> {
        let dir = self.dir_for(destination)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(StoreError::DestinationNotFound(destination.to_string()));
        }

        let name = Self::checked_relative(&upload.name)?.to_path_buf();
        let path = dir.join(&name);
        // Write to a temp file first, then rename for atomicity
        let temp_path = dir.join(format!("{}{PARTIAL_SUFFIX}", name.display()));

        let mut file = tokio::fs::File::create(&temp_path).await?;
        let written = match tokio::io::copy(&mut upload.body, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                    warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove partial upload");
                }
                return Err(StoreError::Io(e));
            }
        };
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &path).await?;

        let metadata = tokio::fs::metadata(&path).await?;
        info!(path = %path.display(), bytes = written, "Stored file");

        Ok(RemoteEntry {
            id: self.id_for(&path),
            name: upload.name,
            created_at: created_at(&metadata),
            size_bytes: Some(written),
        })
    }

    #[instrument(skip(self, _credential))]
    async fn delete(&self, _credential: &Credential, id: &str) -> StoreResult<()> {
        let path = self.root.join(Self::checked_relative(id)?);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
