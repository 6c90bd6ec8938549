//! Configuration module for stowaway.
//!
//! Backups are configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! work_dir = "/var/tmp/stowaway"
//!
//! [destination]
//! folder_id = "nightly"
//! root = "/mnt/backups"
//! oauth_client_id = "${OAUTH_CLIENT_ID}"
//! oauth_client_secret = "${OAUTH_CLIENT_SECRET}"
//!
//! [database]
//! strategy = "except"
//! password = "${MYSQL_PASSWORD}"
//!
//! [groups]
//! website = ["/var/www/html", "/etc/nginx/nginx.conf"]
//! ```

mod database;
mod destination;
mod groups;
mod notifications;
mod observability;
mod retention;
mod schedule;

use std::path::{Path, PathBuf};

pub use database::*;
pub use destination::*;
pub use groups::*;
pub use notifications::*;
pub use observability::*;
pub use retention::*;
pub use schedule::*;
use serde::{Deserialize, Serialize};

/// Root configuration.
///
/// Every section is optional. Missing destination credentials are not a parse
/// error; a backup run refuses to start without them instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Directory dumps and archives are written to before upload.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Where artifacts are uploaded.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Database export settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Named groups of local paths, each compressed into one archive.
    #[serde(default)]
    pub groups: GroupsConfig,

    /// Remote retention policy.
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Daily run times for daemon mode.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Operator notification channels.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            destination: DestinationConfig::default(),
            database: DatabaseConfig::default(),
            groups: GroupsConfig::default(),
            retention: RetentionPolicy::default(),
            schedule: ScheduleConfig::default(),
            notifications: NotificationsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

impl BackupConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: BackupConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("work_dir cannot be empty".into()));
        }
        self.database.validate()?;
        self.groups.validate()?;
        self.retention.validate()?;
        self.schedule.validate()?;
        self.notifications.validate()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid expansion pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
