//! Upload stage.
//!
//! Streams each artifact into the remote store with exact progress (the size
//! is known from the local file). A failed transfer is classified once:
//! rejected credentials get one retry after a refresh, a missing destination
//! folder gets one retry against the store root. Nothing else is retried.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    task::{Context, Poll, ready},
};

use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    artifact::BackupArtifact,
    auth::AuthProvider,
    error::{BackupResult, TransferError, TransferErrorKind},
    progress::{ProgressEstimator, ProgressEvent, ProgressFanout},
    store::{Destination, RemoteEntry, RemoteStore, StoreError, Upload, content_type_for},
};

/// Initial attempt, one after a credential refresh, one against the root.
const MAX_ATTEMPTS: usize = 3;

/// Reports progress as the store pulls bytes from the local file.
///
/// `reported` is shared by every attempt at the same artifact, so a retry
/// stays silent until it passes what the previous attempt already reported.
struct ProgressReader<R> {
    inner: R,
    estimator: ProgressEstimator,
    progress: ProgressFanout,
    label: String,
    reported: Arc<AtomicU8>,
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = buf.filled().len() - before;
        if read > 0 {
            let percent = this.estimator.record(read as u64);
            if this.reported.fetch_max(percent, Ordering::Relaxed) < percent {
                this.progress
                    .update(&ProgressEvent::new(percent, this.label.as_str()));
            }
        }
        Poll::Ready(Ok(()))
    }
}

pub struct Uploader {
    store: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    progress: ProgressFanout,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        progress: ProgressFanout,
    ) -> Self {
        Self {
            store,
            auth,
            progress,
        }
    }

    async fn open(
        &self,
        artifact: &BackupArtifact,
        label: &str,
        reported: Arc<AtomicU8>,
    ) -> Result<Upload, StoreError> {
        let file = tokio::fs::File::open(&artifact.local_path).await?;
        let size = file.metadata().await?.len();
        Ok(Upload {
            name: artifact.file_name(),
            content_type: content_type_for(&artifact.local_path),
            size_bytes: size,
            body: Box::new(ProgressReader {
                inner: file,
                estimator: ProgressEstimator::with_total(size),
                progress: self.progress.clone(),
                label: label.to_string(),
                reported,
            }),
        })
    }

    /// Upload one artifact to `destination`.
    ///
    /// The caller's destination is never changed: a fallback to the root
    /// applies to this artifact only.
    #[instrument(skip(self, artifact), fields(file = %artifact.file_name(), store = self.store.backend_name()))]
    pub async fn upload(
        &self,
        artifact: &BackupArtifact,
        destination: &Destination,
        label: &str,
    ) -> BackupResult<RemoteEntry> {
        let mut credential = self.auth.ensure_valid_credential().await?;
        let mut target = destination.clone();
        let mut refreshed = false;
        let mut fell_back = false;
        let reported = Arc::new(AtomicU8::new(0));
        self.progress.update(&ProgressEvent::new(0, label));

        for attempt in 0..MAX_ATTEMPTS {
            let result = match self.open(artifact, label, reported.clone()).await {
                Ok(upload) => self.store.create(&credential, &target, upload).await,
                Err(e) => Err(e),
            };

            let source = match result {
                Ok(entry) => {
                    self.progress
                        .update(&ProgressEvent::new(100, label).with_detail(entry.name.as_str()));
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Upload succeeded after retry");
                    }
                    info!(
                        name = %entry.name,
                        destination = %target,
                        size_mb = format!("{:.2}", artifact.size_bytes as f64 / 1024.0 / 1024.0),
                        "File uploaded"
                    );
                    return Ok(entry);
                }
                Err(source) => source,
            };

            let kind = source.transfer_kind(&target);
            warn!(error = %source, kind = ?kind, attempt = attempt + 1, "Upload attempt failed");

            match kind {
                TransferErrorKind::Auth if !refreshed => {
                    refreshed = true;
                    match self.auth.refresh_credential().await {
                        Ok(fresh) => {
                            info!("Credential refreshed, retrying upload");
                            credential = fresh;
                        }
                        Err(e) => {
                            warn!(error = %e, "Credential refresh failed");
                            return Err(self.transfer_error(artifact, kind, source).into());
                        }
                    }
                }
                TransferErrorKind::Destination
                    if !fell_back && matches!(target, Destination::Folder(_)) =>
                {
                    fell_back = true;
                    warn!(destination = %target, "Destination folder not found, retrying at store root");
                    target = Destination::Root;
                }
                _ => return Err(self.transfer_error(artifact, kind, source).into()),
            }
        }

        // Every failure class retries at most once, so the loop always returns.
        Err(self
            .transfer_error(
                artifact,
                TransferErrorKind::Terminal,
                StoreError::Backend("upload retries exhausted".to_string()),
            )
            .into())
    }

    fn transfer_error(
        &self,
        artifact: &BackupArtifact,
        kind: TransferErrorKind,
        source: StoreError,
    ) -> TransferError {
        TransferError {
            path: artifact.local_path.clone(),
            kind,
            source,
        }
    }

    /// Upload every artifact in order. Failures are logged and reported, never
    /// raised. Returns how many uploads succeeded.
    pub async fn upload_all(&self, artifacts: &[BackupArtifact], destination: &Destination) -> usize {
        if artifacts.is_empty() {
            info!("No files to upload");
            return 0;
        }

        let operation = format!("Uploading {} files", artifacts.len());
        self.progress.start(&operation);
        info!(destination = %destination, "Uploading to destination");

        let total = artifacts.len();
        let mut uploaded = 0;
        for (i, artifact) in artifacts.iter().enumerate() {
            let context = format!("Upload of {}", artifact.file_name());
            if !artifact.local_path.exists() {
                error!(path = %artifact.local_path.display(), "Artifact file not found, skipping");
                self.progress.failure(&context, "local file not found");
                continue;
            }

            let label = format!("Uploading file {}/{total}", i + 1);
            match self.upload(artifact, destination, &label).await {
                Ok(_) => uploaded += 1,
                Err(e) => {
                    error!(path = %artifact.local_path.display(), error = %e, "Upload failed");
                    self.progress.failure(&context, &e.to_string());
                }
            }
        }

        self.progress.end(&operation, uploaded == total);
        info!(uploaded, total, "Upload stage finished");
        uploaded
    }
}
