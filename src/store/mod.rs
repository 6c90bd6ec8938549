//! Remote store abstraction.
//!
//! The backup core talks to the place artifacts end up through the
//! [`RemoteStore`] trait only. A store lists what is already there (newest
//! first), accepts a streamed upload, and deletes by id. The protocol behind
//! it (a cloud drive API, an object store, a mounted folder) is the
//! implementation's business.
//!
//! Shipped backends:
//! - **Filesystem**: a local or mounted directory, one sub-directory per folder id

mod filesystem;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use filesystem::FilesystemStore;

use crate::{auth::Credential, error::TransferErrorKind};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The entry addressed by id does not exist (anymore).
    #[error("Remote entry not found: {0}")]
    NotFound(String),

    /// The destination folder does not exist.
    #[error("Destination folder not found: {0}")]
    DestinationNotFound(String),

    /// The credential was rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Untyped failure reported by the backend.
    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Message fragments that identify an expired or rejected credential when a
/// backend only gives us text.
const AUTH_SIGNATURES: [&str; 5] = [
    "token",
    "authentication",
    "unauthorized",
    "invalid_grant",
    "invalid_credentials",
];

impl StoreError {
    /// Decide how the uploader should react to this failure.
    pub fn transfer_kind(&self, destination: &Destination) -> TransferErrorKind {
        match self {
            StoreError::Unauthorized(_) => TransferErrorKind::Auth,
            StoreError::DestinationNotFound(_) => TransferErrorKind::Destination,
            StoreError::Backend(message) => {
                let lower = message.to_lowercase();
                if AUTH_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
                    TransferErrorKind::Auth
                } else if let Destination::Folder(folder) = destination
                    && lower.contains("not found")
                    && message.contains(folder.as_str())
                {
                    TransferErrorKind::Destination
                } else {
                    TransferErrorKind::Terminal
                }
            }
            StoreError::NotFound(_) | StoreError::Io(_) => TransferErrorKind::Terminal,
        }
    }
}

/// Where an upload goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A specific folder, identified by the store's folder id.
    Folder(String),
    /// The store's default root.
    Root,
}

impl Destination {
    pub fn folder(id: impl Into<String>) -> Self {
        Destination::Folder(id.into())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Folder(id) => write!(f, "folder {id}"),
            Destination::Root => f.write_str("root"),
        }
    }
}

/// A previously uploaded artifact as the store knows it.
///
/// Snapshots are taken fresh for every retention pass and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
}

/// Streamed upload body.
pub type UploadBody = Box<dyn AsyncRead + Send + Unpin>;

/// One file to create in the store.
pub struct Upload {
    pub name: String,
    pub content_type: &'static str,
    pub size_bytes: u64,
    pub body: UploadBody,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Content type sent along with an artifact, by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("sql") => "application/sql",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("tar") => "application/x-tar",
        _ => "application/octet-stream",
    }
}

/// Trait for pluggable remote stores.
///
/// Every call takes the credential to use; implementations must not keep it.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List files in `destination`, newest first by creation time.
    ///
    /// `name_filter`, when given, keeps only names containing that substring.
    /// Folders are never returned.
    async fn list(
        &self,
        credential: &Credential,
        destination: &Destination,
        name_filter: Option<&str>,
    ) -> StoreResult<Vec<RemoteEntry>>;

    /// Stream `upload` into `destination`.
    async fn create(
        &self,
        credential: &Credential,
        destination: &Destination,
        upload: Upload,
    ) -> StoreResult<RemoteEntry>;

    /// Delete an entry by id. Returns [`StoreError::NotFound`] when it is already gone.
    async fn delete(&self, credential: &Credential, id: &str) -> StoreResult<()>;

    /// Backend type name (for logging).
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory store double with scripted failures.

    use std::collections::VecDeque;

    use chrono::Duration;
    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        pub entries: Mutex<Vec<(Destination, RemoteEntry)>>,
        /// Failures returned by the next `create` calls, in order.
        pub create_failures: Mutex<VecDeque<StoreError>>,
        /// Ids whose deletion fails with a backend error.
        pub failing_deletes: Mutex<Vec<String>>,
        pub create_calls: Mutex<Vec<Destination>>,
        pub list_calls: Mutex<usize>,
        pub delete_calls: Mutex<Vec<String>>,
        pub credentials_seen: Mutex<Vec<String>>,
        /// Destinations that exist. `Root` always exists.
        pub folders: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        pub fn with_folder(folder: &str) -> Self {
            let store = Self::default();
            store.folders.lock().push(folder.to_string());
            store
        }

        /// Seed `count` entries named by `name_of(i)`, entry 0 newest.
        pub fn seed(&self, destination: &Destination, names: &[&str], newest: DateTime<Utc>) {
            let mut entries = self.entries.lock();
            for (i, name) in names.iter().enumerate() {
                entries.push((
                    destination.clone(),
                    RemoteEntry {
                        id: format!("id-{name}"),
                        name: name.to_string(),
                        created_at: newest - Duration::hours(i as i64),
                        size_bytes: Some(1),
                    },
                ));
            }
        }

        pub fn names(&self) -> Vec<String> {
            self.entries
                .lock()
                .iter()
                .map(|(_, e)| e.name.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryStore {
        async fn list(
            &self,
            credential: &Credential,
            destination: &Destination,
            name_filter: Option<&str>,
        ) -> StoreResult<Vec<RemoteEntry>> {
            *self.list_calls.lock() += 1;
            self.credentials_seen
                .lock()
                .push(credential.token().to_string());
            let mut listed: Vec<RemoteEntry> = self
                .entries
                .lock()
                .iter()
                .filter(|(d, e)| {
                    d == destination && name_filter.is_none_or(|f| e.name.contains(f))
                })
                .map(|(_, e)| e.clone())
                .collect();
            listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(listed)
        }

        async fn create(
            &self,
            credential: &Credential,
            destination: &Destination,
            mut upload: Upload,
        ) -> StoreResult<RemoteEntry> {
            self.create_calls.lock().push(destination.clone());
            self.credentials_seen
                .lock()
                .push(credential.token().to_string());

            let mut body = Vec::new();
            upload.body.read_to_end(&mut body).await?;

            if let Some(err) = self.create_failures.lock().pop_front() {
                return Err(err);
            }
            if let Destination::Folder(folder) = destination
                && !self.folders.lock().contains(folder)
            {
                return Err(StoreError::DestinationNotFound(folder.clone()));
            }

            let entry = RemoteEntry {
                id: format!("id-{}", upload.name),
                name: upload.name,
                created_at: Utc::now(),
                size_bytes: Some(body.len() as u64),
            };
            self.entries
                .lock()
                .push((destination.clone(), entry.clone()));
            Ok(entry)
        }

        async fn delete(&self, _credential: &Credential, id: &str) -> StoreResult<()> {
            self.delete_calls.lock().push(id.to_string());
            if self.failing_deletes.lock().iter().any(|f| f == id) {
                return Err(StoreError::Backend(format!("backend refused to delete {id}")));
            }
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|(_, e)| e.id != id);
            if entries.len() == before {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "memory"
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::typed_auth(StoreError::Unauthorized("401".into()), TransferErrorKind::Auth)]
    #[case::token_message(StoreError::Backend("Invalid token provided".into()), TransferErrorKind::Auth)]
    #[case::grant_message(StoreError::Backend("invalid_grant".into()), TransferErrorKind::Auth)]
    #[case::typed_destination(StoreError::DestinationNotFound("f1".into()), TransferErrorKind::Destination)]
    #[case::folder_message(StoreError::Backend("File not found: f1.".into()), TransferErrorKind::Destination)]
    #[case::other_not_found(StoreError::Backend("File not found: other".into()), TransferErrorKind::Terminal)]
    #[case::quota(StoreError::Backend("quota exceeded".into()), TransferErrorKind::Terminal)]
    fn test_transfer_kind(#[case] error: StoreError, #[case] expected: TransferErrorKind) {
        assert_eq!(error.transfer_kind(&Destination::folder("f1")), expected);
    }

    #[test]
    fn test_folder_signature_needs_a_folder_destination() {
        let error = StoreError::Backend("File not found: f1".into());
        assert_eq!(
            error.transfer_kind(&Destination::Root),
            TransferErrorKind::Terminal
        );
    }

    #[rstest]
    #[case("db-shop.sql", "application/sql")]
    #[case("files-2024.tar.gz", "application/gzip")]
    #[case("bundle.TGZ", "application/gzip")]
    #[case("raw.tar", "application/x-tar")]
    #[case("notes.txt", "application/octet-stream")]
    #[case("no_extension", "application/octet-stream")]
    fn test_content_type_for(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(content_type_for(Path::new(name)), expected);
    }
}
