//! Database export stage.
//!
//! Drives the dump program once per unit, strictly one at a time. Each dump's
//! stdout is streamed straight into its output file while stderr is drained
//! concurrently, so memory stays flat for multi-gigabyte dumps.
//!
//! Percentages are estimated: the first chunk times
//! [`DEFAULT_SEED_FACTOR`](crate::progress::DEFAULT_SEED_FACTOR) stands in for
//! the unknown total, progress stalls at 95% at most, and only a clean exit
//! reports 100%.

use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
};
use tracing::{error, info, instrument, warn};

use crate::{
    artifact::{ArtifactKind, BackupArtifact, timestamp_suffix},
    config::{DatabaseConfig, ExportStrategy},
    error::{BackupError, BackupResult},
    process::{CommandSpec, ProcessSpawner, ProcessStream, SpawnedProcess, capture},
    progress::{DEFAULT_SEED_FACTOR, ProgressEstimator, ProgressEvent, ProgressFanout},
};

const CHUNK_SIZE: usize = 64 * 1024;
const STDERR_TAIL_LINES: usize = 5;

/// What to dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPlan {
    /// A single dump with every database.
    Everything,
    /// One dump per named unit. Empty means "every listed unit".
    Units(Vec<String>),
    /// One dump per listed unit that is not excluded.
    AllExcept,
}

impl ExportPlan {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        match config.strategy {
            ExportStrategy::All => ExportPlan::Everything,
            ExportStrategy::Individual => ExportPlan::Units(config.units.clone()),
            ExportStrategy::Except => ExportPlan::AllExcept,
        }
    }
}

/// Result of an export call in multi-unit mode: what was produced, and what
/// failed along the way.
#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub artifacts: Vec<BackupArtifact>,
    pub failures: Vec<BackupError>,
}

enum DumpTarget<'a> {
    All,
    Unit(&'a str),
}

impl DumpTarget<'_> {
    fn unit_name(&self) -> &str {
        match self {
            DumpTarget::All => "all-databases",
            DumpTarget::Unit(unit) => unit,
        }
    }

    fn file_name(&self, timestamp: &str) -> String {
        match self {
            DumpTarget::All => format!("all-databases-{timestamp}.sql"),
            DumpTarget::Unit(unit) => format!("db-{unit}-{timestamp}.sql"),
        }
    }
}

pub struct Exporter {
    config: DatabaseConfig,
    output_dir: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
    progress: ProgressFanout,
}

impl Exporter {
    pub fn new(
        config: DatabaseConfig,
        output_dir: impl Into<PathBuf>,
        spawner: Arc<dyn ProcessSpawner>,
        progress: ProgressFanout,
    ) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
            spawner,
            progress,
        }
    }

    /// Export according to `plan`.
    ///
    /// In [`ExportPlan::Everything`] mode a failed dump fails the call. In the
    /// per-unit modes each failure is logged, reported and collected in
    /// [`ExportOutcome::failures`] while the remaining units are dumped.
    pub async fn export(&self, plan: &ExportPlan) -> BackupResult<ExportOutcome> {
        if !self.config.enabled {
            info!("Database backup disabled in configuration");
            return Ok(ExportOutcome::default());
        }

        match plan {
            ExportPlan::Everything => {
                let operation = "Exporting all databases";
                self.progress.start(operation);
                let result = self.dump(DumpTarget::All, operation).await;
                self.progress.end(operation, result.is_ok());
                Ok(ExportOutcome {
                    artifacts: vec![result?],
                    failures: Vec::new(),
                })
            }
            ExportPlan::Units(units) => {
                let units = if units.is_empty() {
                    self.list_units().await?
                } else {
                    units.clone()
                };
                Ok(self.export_units(&units).await)
            }
            ExportPlan::AllExcept => {
                let units: Vec<String> = self
                    .list_units()
                    .await?
                    .into_iter()
                    .filter(|u| !self.config.is_excluded(u))
                    .collect();
                Ok(self.export_units(&units).await)
            }
        }
    }

    /// Ask the database for its unit names, dropping blanks and excluded ones.
    #[instrument(skip(self))]
    pub async fn list_units(&self) -> BackupResult<Vec<String>> {
        let mut command = CommandSpec::new(&self.config.client_command)
            .args(self.config.connection_args())
            .args(["-N", "-e", "SHOW DATABASES;"]);
        if let Some(password) = &self.config.password {
            command = command.env("MYSQL_PWD", password);
        }

        let output = capture(self.spawner.as_ref(), &command)
            .await
            .map_err(|e| BackupError::process("database listing", e.to_string()))?;
        if !output.success() {
            return Err(BackupError::process(
                "database listing",
                format!("exited with code {}: {}", output.code, output.stderr.trim()),
            ));
        }

        let units: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|u| !u.is_empty() && !self.config.is_excluded(u))
            .map(String::from)
            .collect();
        info!(count = units.len(), "Listed databases");
        Ok(units)
    }

    async fn export_units(&self, units: &[String]) -> ExportOutcome {
        let operation = format!("Exporting {} databases", units.len());
        self.progress.start(&operation);

        let mut outcome = ExportOutcome::default();
        for (i, unit) in units.iter().enumerate() {
            let label = format!("Exporting database {unit} ({}/{})", i + 1, units.len());
            match self.dump(DumpTarget::Unit(unit), &label).await {
                Ok(artifact) => outcome.artifacts.push(artifact),
                Err(e) => {
                    error!(unit = %unit, error = %e, "Database export failed");
                    self.progress
                        .failure(&format!("Export of database {unit}"), &e.to_string());
                    outcome.failures.push(e);
                }
            }
        }

        self.progress.end(&operation, outcome.failures.is_empty());
        outcome
    }

    fn dump_command(&self, target: &DumpTarget<'_>) -> CommandSpec {
        let mut command =
            CommandSpec::new(&self.config.dump_command).args(self.config.connection_args());
        command = match target {
            DumpTarget::All => command.args(["--all-databases", "--ignore-table=mysql.event"]),
            DumpTarget::Unit(unit) => command.arg("--databases").arg(*unit),
        };
        if let Some(password) = &self.config.password {
            command = command.env("MYSQL_PWD", password);
        }
        command
    }

    #[instrument(skip(self, target, label), fields(unit = target.unit_name()))]
    async fn dump(&self, target: DumpTarget<'_>, label: &str) -> BackupResult<BackupArtifact> {
        let unit = target.unit_name().to_string();
        let path: PathBuf = self
            .output_dir
            .join(target.file_name(&timestamp_suffix(Utc::now())));
        let command = self.dump_command(&target);

        let mut file = File::create(&path).await.map_err(|e| {
            BackupError::process(&unit, format!("cannot create {}: {e}", path.display()))
        })?;

        let SpawnedProcess {
            stdout,
            stderr,
            exit,
        } = self
            .spawner
            .spawn(&command)
            .map_err(|e| BackupError::process(&unit, format!("failed to start {}: {e}", command.program)))?;

        let mut estimator = ProgressEstimator::seeded(DEFAULT_SEED_FACTOR);
        self.progress.update(&ProgressEvent::new(0, label));

        let (pumped, stderr_tail, code) = tokio::join!(
            pump(stdout, &mut file, &mut estimator, &self.progress, label),
            drain_stderr(stderr, &unit),
            exit
        );

        pumped.map_err(|e| BackupError::process(&unit, format!("writing dump failed: {e}")))?;
        file.flush().await?;
        drop(file);

        let code = code.map_err(|e| BackupError::process(&unit, format!("wait failed: {e}")))?;
        if code != 0 {
            let mut reason = format!("{} exited with code {code}", command.program);
            if !stderr_tail.is_empty() {
                reason.push_str(": ");
                reason.push_str(&stderr_tail.join(" | "));
            }
            return Err(BackupError::process(unit, reason));
        }

        self.progress
            .update(&ProgressEvent::new(estimator.complete(), label).with_detail("done"));
        info!(
            path = %path.display(),
            bytes = estimator.processed(),
            "Database dump written"
        );

        Ok(BackupArtifact::new(
            path,
            estimator.processed(),
            ArtifactKind::DatabaseDump,
        ))
    }
}

/// Copy stdout into `file`, publishing a percent whenever it moves.
async fn pump(
    mut stdout: ProcessStream,
    file: &mut File,
    estimator: &mut ProgressEstimator,
    progress: &ProgressFanout,
    label: &str,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut last = 0;
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        file.write_all(&buf[..n]).await?;
        let percent = estimator.record(n as u64);
        if percent != last {
            last = percent;
            progress.update(&ProgressEvent::new(percent, label));
        }
    }
}

/// Log each stderr line as a warning and keep the last few for the error message.
async fn drain_stderr(stderr: ProcessStream, unit: &str) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = Vec::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                warn!(unit = %unit, stderr = %line, "Dump process wrote to stderr");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            Ok(None) => return tail,
            Err(e) => {
                warn!(unit = %unit, error = %e, "Failed reading dump stderr");
                return tail;
            }
        }
    }
}
