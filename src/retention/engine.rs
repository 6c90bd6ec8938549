use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::NamePatterns;
use crate::{
    auth::{AuthProvider, Credential},
    config::{RetentionPolicy, RetentionRule},
    error::{BackupError, BackupResult},
    progress::{ProgressEvent, ProgressFanout},
    store::{Destination, RemoteEntry, RemoteStore, StoreError},
};

/// Pick the entries a retention pass deletes.
///
/// `entries` must already be sorted newest first, as every store lists them.
/// Only names matching `patterns` are eligible.
pub fn select_for_deletion(
    entries: &[RemoteEntry],
    patterns: &NamePatterns,
    rule: RetentionRule,
    now: DateTime<Utc>,
) -> Vec<RemoteEntry> {
    let eligible = patterns.filter(entries);
    match rule {
        RetentionRule::KeepLast(keep) => eligible.into_iter().skip(keep).collect(),
        RetentionRule::OlderThanDays(days) => {
            // A cutoff before the representable range means nothing is that old.
            let Some(cutoff) =
                Duration::try_days(i64::from(days)).and_then(|age| now.checked_sub_signed(age))
            else {
                return Vec::new();
            };
            eligible
                .into_iter()
                .filter(|e| e.created_at < cutoff)
                .collect()
        }
    }
}

/// Results from a single retention pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    /// Entries in the destination listing.
    pub listed: usize,
    /// Entries matching a backup name pattern.
    pub matched: usize,
    /// Entries chosen for deletion.
    pub selected: usize,
    /// Confirmed deletions.
    pub deleted: usize,
    /// Entries already gone when deleted.
    pub not_found: usize,
    /// Deletions that failed for any other reason.
    pub failed: usize,
    pub dry_run: bool,
}

impl RetentionReport {
    pub fn has_deletions(&self) -> bool {
        self.deleted > 0
    }
}

/// Outcome of deleting a batch of entries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub deleted: usize,
    pub not_found: usize,
    pub failed: usize,
}

pub struct RetentionEngine {
    store: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    policy: RetentionPolicy,
    patterns: NamePatterns,
    progress: ProgressFanout,
}

impl RetentionEngine {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        policy: RetentionPolicy,
        progress: ProgressFanout,
    ) -> BackupResult<Self> {
        let patterns = NamePatterns::new(&policy.patterns)
            .map_err(|e| BackupError::Config(format!("invalid retention pattern: {e}")))?;
        Ok(Self {
            store,
            auth,
            policy,
            patterns,
            progress,
        })
    }

    /// Backups currently in `destination`, newest first. Non-backup files are
    /// left out.
    pub async fn snapshot(&self, destination: &Destination) -> BackupResult<Vec<RemoteEntry>> {
        let credential = self.auth.ensure_valid_credential().await?;
        let listing = self.store.list(&credential, destination, None).await?;
        Ok(self.patterns.filter(&listing))
    }

    /// One retention pass over a fresh listing of `destination`.
    #[instrument(skip(self), fields(store = self.store.backend_name(), rule = ?self.policy.rule()))]
    pub async fn run(&self, destination: &Destination) -> BackupResult<RetentionReport> {
        let mut report = RetentionReport {
            dry_run: self.policy.dry_run,
            ..Default::default()
        };
        if !self.policy.enabled {
            info!("Retention disabled by configuration");
            return Ok(report);
        }

        let credential = self.auth.ensure_valid_credential().await?;
        let listing = self.store.list(&credential, destination, None).await?;
        report.listed = listing.len();
        report.matched = listing
            .iter()
            .filter(|e| self.patterns.matches(&e.name))
            .count();

        let selected = select_for_deletion(&listing, &self.patterns, self.policy.rule(), Utc::now());
        report.selected = selected.len();

        if selected.is_empty() {
            debug!(matched = report.matched, "No old backups to delete");
            return Ok(report);
        }

        if self.policy.dry_run {
            for entry in &selected {
                info!(
                    name = %entry.name,
                    created_at = %entry.created_at,
                    "Would delete old backup (DRY RUN)"
                );
            }
            return Ok(report);
        }

        let operation = format!("Deleting {} old backups", selected.len());
        self.progress.start(&operation);
        let outcome = self.delete_all(&credential, &selected).await;
        self.progress.end(&operation, outcome.failed == 0);

        report.deleted = outcome.deleted;
        report.not_found = outcome.not_found;
        report.failed = outcome.failed;
        if report.has_deletions() {
            info!(
                deleted = report.deleted,
                not_found = report.not_found,
                failed = report.failed,
                matched = report.matched,
                "Retention pass complete"
            );
        } else {
            warn!(failed = report.failed, "Retention pass deleted nothing");
        }
        Ok(report)
    }

    /// Delete every entry independently. An id is attempted at most once.
    /// Delete one entry. An entry that is already gone is `NotFound`.
    pub async fn delete(&self, credential: &Credential, entry: &RemoteEntry) -> BackupResult<()> {
        match self.store.delete(credential, &entry.id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(BackupError::NotFound(entry.name.clone())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_all(
        &self,
        credential: &Credential,
        entries: &[RemoteEntry],
    ) -> DeletionOutcome {
        let mut outcome = DeletionOutcome::default();
        let mut seen = HashSet::new();
        let total = entries.len();

        for (i, entry) in entries.iter().enumerate() {
            if !seen.insert(entry.id.as_str()) {
                continue;
            }
            match self.delete(credential, entry).await {
                Ok(()) => {
                    outcome.deleted += 1;
                    info!(name = %entry.name, "Deleted old backup");
                }
                Err(BackupError::NotFound(_)) => {
                    outcome.not_found += 1;
                    warn!(name = %entry.name, "Old backup already gone");
                }
                Err(e) => {
                    outcome.failed += 1;
                    error!(name = %entry.name, error = %e, "Failed to delete old backup");
                    self.progress
                        .failure(&format!("Deletion of {}", entry.name), &e.to_string());
                }
            }
            let percent = ((i + 1) * 100 / total) as u8;
            self.progress.update(
                &ProgressEvent::new(percent, "Deleting old backups")
                    .with_detail(format!("{}/{total}", i + 1)),
            );
        }
        outcome
    }
}
