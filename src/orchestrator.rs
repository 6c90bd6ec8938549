//! One backup run from start to finish.
//!
//! Stages run strictly in order, each processing its items one at a time:
//!
//! ```text
//! Idle -> CleaningOld -> Exporting -> Compressing -> Uploading
//!      -> CleaningLocal -> CleaningOldAgain -> Done | Failed
//! ```
//!
//! Per-item failures stay inside the stage that hit them. A run fails only on
//! missing destination settings (before anything happens), on a fatal export,
//! or when exporting and compressing produced nothing.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::{
    archiver::Archiver,
    artifact::BackupArtifact,
    auth::AuthProvider,
    config::BackupConfig,
    error::{BackupError, BackupResult},
    exporter::{ExportPlan, Exporter},
    process::ProcessSpawner,
    progress::ProgressFanout,
    retention::RetentionEngine,
    store::{Destination, RemoteStore},
    uploader::Uploader,
};

/// What a run backs up. Resolved once when the run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Databases and file groups.
    #[default]
    Full,
    /// Databases only.
    Database,
    /// File groups only.
    Files,
}

impl BackupKind {
    pub fn exports_databases(self) -> bool {
        matches!(self, BackupKind::Full | BackupKind::Database)
    }

    pub fn compresses_groups(self) -> bool {
        matches!(self, BackupKind::Full | BackupKind::Files)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Database => "database",
            BackupKind::Files => "files",
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(BackupKind::Full),
            "database" | "db" => Ok(BackupKind::Database),
            "files" => Ok(BackupKind::Files),
            other => Err(format!("unknown backup kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    CleaningOld,
    Exporting,
    Compressing,
    Uploading,
    CleaningLocal,
    CleaningOldAgain,
    Done,
    Failed,
}

/// Summary of one run, handed to every progress sink when the run ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub kind: BackupKind,
    pub success: bool,
    /// Artifacts uploaded.
    pub files_processed: usize,
    /// Artifacts produced.
    pub total_files: usize,
    pub total_size_bytes: u64,
    /// Local files removed after upload.
    pub local_files_removed: usize,
    /// Remote backups deleted by both retention passes.
    pub remote_deleted: usize,
    /// Wall clock from start to `Done` or to the failure.
    pub duration: Duration,
    /// Stages entered, in order.
    pub stages: Vec<RunStage>,
    /// Stage that was active when the run failed.
    pub failed_stage: Option<RunStage>,
    #[serde(skip)]
    pub error: Option<Arc<BackupError>>,
}

impl RunResult {
    fn new(kind: BackupKind) -> Self {
        Self {
            kind,
            success: false,
            files_processed: 0,
            total_files: 0,
            total_size_bytes: 0,
            local_files_removed: 0,
            remote_deleted: 0,
            duration: Duration::ZERO,
            stages: vec![RunStage::Idle],
            failed_stage: None,
            error: None,
        }
    }

    fn enter(&mut self, stage: RunStage) {
        info!(stage = ?stage, "Entering stage");
        self.stages.push(stage);
    }

    fn current_stage(&self) -> RunStage {
        self.stages.last().copied().unwrap_or(RunStage::Idle)
    }

    pub fn duration_display(&self) -> String {
        format_duration(self.duration)
    }

    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / 1024.0 / 1024.0
    }
}

/// `1h 2m 3s`, `2m 3s` or `3s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Remove local artifact files that still exist. Returns how many were removed.
pub async fn clean_local(artifacts: &[BackupArtifact]) -> usize {
    let mut removed = 0;
    for artifact in artifacts {
        if !artifact.local_path.exists() {
            continue;
        }
        match tokio::fs::remove_file(&artifact.local_path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(
                path = %artifact.local_path.display(),
                error = %e,
                "Failed to remove local file"
            ),
        }
    }
    info!(removed, "Local files cleaned up");
    removed
}

pub struct Orchestrator {
    config: Arc<BackupConfig>,
    exporter: Exporter,
    archiver: Archiver,
    uploader: Uploader,
    retention: RetentionEngine,
    progress: ProgressFanout,
}

impl Orchestrator {
    pub fn new(
        config: Arc<BackupConfig>,
        store: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        spawner: Arc<dyn ProcessSpawner>,
        progress: ProgressFanout,
    ) -> BackupResult<Self> {
        Ok(Self {
            exporter: Exporter::new(
                config.database.clone(),
                &config.work_dir,
                spawner,
                progress.clone(),
            ),
            archiver: Archiver::new(&config.work_dir, progress.clone()),
            uploader: Uploader::new(store.clone(), auth.clone(), progress.clone()),
            retention: RetentionEngine::new(
                store,
                auth,
                config.retention.clone(),
                progress.clone(),
            )?,
            config,
            progress,
        })
    }

    pub fn retention(&self) -> &RetentionEngine {
        &self.retention
    }

    /// Run every stage for `kind`. Never returns an error: failures end up in
    /// the returned [`RunResult`], which sinks also receive exactly once.
    #[instrument(skip(self))]
    pub async fn run(&self, kind: BackupKind) -> RunResult {
        let started = Instant::now();
        let mut result = RunResult::new(kind);
        info!(kind = %kind, "Backup run starting");

        match self.execute(kind, &mut result).await {
            Ok(()) => {
                result.enter(RunStage::Done);
                result.success = true;
                result.duration = started.elapsed();
                info!(
                    uploaded = result.files_processed,
                    total = result.total_files,
                    size_mb = format!("{:.2}", result.total_size_mb()),
                    duration = %result.duration_display(),
                    "Backup run finished"
                );
            }
            Err(e) => {
                result.failed_stage = Some(result.current_stage());
                result.enter(RunStage::Failed);
                result.duration = started.elapsed();
                error!(
                    stage = ?result.failed_stage,
                    duration = %result.duration_display(),
                    error = %e,
                    "Backup run failed"
                );
                result.error = Some(Arc::new(e));
            }
        }

        self.progress.run_finished(&result);
        result
    }

    async fn execute(&self, kind: BackupKind, result: &mut RunResult) -> BackupResult<()> {
        let destination = self
            .config
            .destination
            .preflight()
            .map_err(BackupError::Config)?;

        result.enter(RunStage::CleaningOld);
        result.remote_deleted += self.clean_remote(&destination).await;

        let mut artifacts = Vec::new();

        if kind.exports_databases() {
            result.enter(RunStage::Exporting);
            tokio::fs::create_dir_all(&self.config.work_dir).await?;
            match self
                .exporter
                .export(&ExportPlan::from_config(&self.config.database))
                .await
            {
                Ok(outcome) => artifacts.extend(outcome.artifacts),
                Err(e) => {
                    error!(error = %e, "Database export failed");
                    self.progress.failure("Database export", &e.to_string());
                }
            }
        }

        if kind.compresses_groups() {
            result.enter(RunStage::Compressing);
            tokio::fs::create_dir_all(&self.config.work_dir).await?;
            artifacts.extend(self.archiver.compress_groups(&self.config.groups).await);
        }

        if artifacts.is_empty() {
            return Err(BackupError::EmptyResult);
        }

        result.total_files = artifacts.len();
        result.total_size_bytes = artifacts.iter().map(|a| a.size_bytes).sum();
        info!(
            files = result.total_files,
            size_mb = format!("{:.2}", result.total_size_mb()),
            "Artifacts ready for upload"
        );

        result.enter(RunStage::Uploading);
        result.files_processed = self.uploader.upload_all(&artifacts, &destination).await;

        result.enter(RunStage::CleaningLocal);
        result.local_files_removed = clean_local(&artifacts).await;

        result.enter(RunStage::CleaningOldAgain);
        result.remote_deleted += self.clean_remote(&destination).await;

        Ok(())
    }

    /// A retention pass whose failure is logged and reported but never fails the run.
    async fn clean_remote(&self, destination: &Destination) -> usize {
        match self.retention.run(destination).await {
            Ok(report) => report.deleted,
            Err(e) => {
                error!(error = %e, "Cleanup of old backups failed");
                self.progress
                    .failure("Cleanup of old backups", &e.to_string());
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        auth::StaticAuth,
        config::{DatabaseConfig, DestinationConfig, ExportStrategy, GroupsConfig, RetentionPolicy},
        process::test_support::{Script, ScriptedSpawner},
        progress::test_support::RecordingSink,
        store::{StoreError, test_support::MemoryStore},
    };

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryStore>,
        spawner: Arc<ScriptedSpawner>,
        sink: Arc<RecordingSink>,
        orchestrator: Orchestrator,
    }

    fn destination() -> DestinationConfig {
        DestinationConfig {
            folder_id: Some("backups".into()),
            oauth_client_id: Some("client".into()),
            oauth_client_secret: Some("secret".into()),
            ..Default::default()
        }
    }

    /// One group `site` with one file, and one database dump (`all`).
    fn config(dir: &TempDir) -> BackupConfig {
        let site = dir.path().join("site.conf");
        std::fs::write(&site, "listen 80;").unwrap();
        BackupConfig {
            work_dir: dir.path().join("work"),
            destination: destination(),
            groups: GroupsConfig(BTreeMap::from([("site".to_string(), vec![site])])),
            retention: RetentionPolicy {
                keep_last: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn fixture_with(
        dir: TempDir,
        config: BackupConfig,
        store: MemoryStore,
        spawner: ScriptedSpawner,
    ) -> Fixture {
        let store = Arc::new(store);
        let spawner = Arc::new(spawner);
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(
            Arc::new(config),
            store.clone(),
            Arc::new(StaticAuth::new("token")),
            spawner.clone(),
            ProgressFanout::new().with_sink(sink.clone()),
        )
        .unwrap();
        Fixture {
            dir,
            store,
            spawner,
            sink,
            orchestrator,
        }
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        fixture_with(
            dir,
            config,
            MemoryStore::with_folder("backups"),
            ScriptedSpawner::default().on("mysqldump", Script::ok("-- MySQL dump\n")),
        )
    }

    #[tokio::test]
    async fn test_full_run() {
        let f = fixture();

        let result = f.orchestrator.run(BackupKind::Full).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.stages,
            vec![
                RunStage::Idle,
                RunStage::CleaningOld,
                RunStage::Exporting,
                RunStage::Compressing,
                RunStage::Uploading,
                RunStage::CleaningLocal,
                RunStage::CleaningOldAgain,
                RunStage::Done,
            ]
        );
        assert_eq!(result.total_files, 2);
        assert_eq!(result.files_processed, 2);
        assert_eq!(result.local_files_removed, 2);

        let names = f.store.names();
        assert!(names.iter().any(|n| n.starts_with("all-databases-") && n.ends_with(".sql")));
        assert!(names.iter().any(|n| n.starts_with("site-") && n.ends_with(".tar.gz")));
        assert_eq!(*f.store.list_calls.lock(), 2);
        assert_eq!(std::fs::read_dir(f.dir.path().join("work")).unwrap().count(), 0);
        assert_eq!(*f.sink.finished.lock(), vec![true]);
    }

    #[tokio::test]
    async fn test_kind_selects_stages() {
        let f = fixture();

        let result = f.orchestrator.run(BackupKind::Files).await;

        assert!(result.success);
        assert!(!result.stages.contains(&RunStage::Exporting));
        assert_eq!(f.spawner.call_count(), 0);
        assert_eq!(result.total_files, 1);

        let result = f.orchestrator.run(BackupKind::Database).await;
        assert!(result.success);
        assert!(!result.stages.contains(&RunStage::Compressing));
        assert_eq!(result.total_files, 1);
    }

    #[tokio::test]
    async fn test_missing_destination_fails_before_side_effects() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.destination.oauth_client_secret = None;
        let f = fixture_with(
            dir,
            config,
            MemoryStore::with_folder("backups"),
            ScriptedSpawner::default(),
        );

        let result = f.orchestrator.run(BackupKind::Full).await;

        assert!(!result.success);
        assert!(matches!(result.error.as_deref(), Some(BackupError::Config(_))));
        assert_eq!(result.failed_stage, Some(RunStage::Idle));
        assert_eq!(*f.store.list_calls.lock(), 0);
        assert_eq!(f.spawner.call_count(), 0);
        assert!(!f.dir.path().join("work").exists());
        assert_eq!(*f.sink.finished.lock(), vec![false]);
    }

    #[tokio::test]
    async fn test_nothing_produced_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = BackupConfig {
            work_dir: dir.path().join("work"),
            destination: destination(),
            database: DatabaseConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let f = fixture_with(
            dir,
            config,
            MemoryStore::with_folder("backups"),
            ScriptedSpawner::default(),
        );

        let result = f.orchestrator.run(BackupKind::Full).await;

        assert!(!result.success);
        assert!(matches!(result.error.as_deref(), Some(BackupError::EmptyResult)));
        assert!(result.stages.contains(&RunStage::CleaningOld));
        assert!(!result.stages.contains(&RunStage::Uploading));
        assert!(!result.stages.contains(&RunStage::CleaningLocal));
        assert_eq!(result.failed_stage, Some(RunStage::Compressing));
        assert_eq!(*f.store.list_calls.lock(), 1);
        assert!(f.store.create_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_export_of_everything_continues_to_compression() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let f = fixture_with(
            dir,
            config,
            MemoryStore::with_folder("backups"),
            ScriptedSpawner::default().on("mysqldump", Script::exit(2, "Access denied")),
        );

        let result = f.orchestrator.run(BackupKind::Full).await;

        assert!(result.success);
        assert_eq!(result.total_files, 1);
        assert!(
            f.sink
                .failures
                .lock()
                .iter()
                .any(|(context, message)| context == "Database export"
                    && message.contains("Access denied"))
        );
    }

    #[tokio::test]
    async fn test_upload_failure_still_cleans_local_files() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.database.strategy = ExportStrategy::All;
        let store = MemoryStore::with_folder("backups");
        store
            .create_failures
            .lock()
            .push_back(StoreError::Backend("quota exceeded".into()));
        let f = fixture_with(
            dir,
            config,
            store,
            ScriptedSpawner::default().on("mysqldump", Script::ok("-- dump\n")),
        );

        let result = f.orchestrator.run(BackupKind::Full).await;

        assert!(result.success);
        assert_eq!(result.files_processed, 1);
        assert_eq!(result.total_files, 2);
        assert_eq!(result.local_files_removed, 2);
        assert!(result.stages.contains(&RunStage::CleaningOldAgain));
    }

    #[tokio::test]
    async fn test_second_retention_pass_sees_new_uploads() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.retention.keep_last = 1;
        let store = MemoryStore::with_folder("backups");
        store.seed(
            &Destination::folder("backups"),
            &["site-old.tar.gz"],
            Utc::now() - chrono::Duration::days(1),
        );
        let f = fixture_with(dir, config, store, ScriptedSpawner::default());

        let result = f.orchestrator.run(BackupKind::Files).await;

        assert!(result.success);
        assert_eq!(result.remote_deleted, 1);
        let names = f.store.names();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("site-") && names[0] != "site-old.tar.gz");
    }

    #[tokio::test]
    async fn test_clean_local_counts_removed_files() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("a.sql");
        std::fs::write(&present, "x").unwrap();
        let artifacts = vec![
            BackupArtifact::new(&present, 1, crate::artifact::ArtifactKind::DatabaseDump),
            BackupArtifact::new(
                dir.path().join("gone.sql"),
                1,
                crate::artifact::ArtifactKind::DatabaseDump,
            ),
        ];

        assert_eq!(clean_local(&artifacts).await, 1);
        assert!(!present.exists());
    }

    #[rstest]
    #[case(0, "0s")]
    #[case(59, "59s")]
    #[case(60, "1m 0s")]
    #[case(3599, "59m 59s")]
    #[case(3600, "1h 0m 0s")]
    #[case(3723, "1h 2m 3s")]
    fn test_format_duration(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(format_duration(Duration::from_secs(secs)), expected);
    }

    #[rstest]
    #[case("full", BackupKind::Full)]
    #[case("Database", BackupKind::Database)]
    #[case("files", BackupKind::Files)]
    fn test_backup_kind_from_str(#[case] input: &str, #[case] expected: BackupKind) {
        assert_eq!(input.parse::<BackupKind>().unwrap(), expected);
    }

    #[test]
    fn test_backup_kind_rejects_unknown() {
        assert!("everything".parse::<BackupKind>().is_err());
    }
}
