use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Database export configuration.
///
/// Dumps are produced by an external client (`mysqldump` by default). The
/// password is handed over through the `MYSQL_PWD` environment variable so it
/// never shows up in a process listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Set to false to skip database exports entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Which databases to dump.
    #[serde(default)]
    pub strategy: ExportStrategy,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Databases to dump one by one with `strategy = "individual"`.
    /// When empty, every listed database not in `excluded` is dumped.
    #[serde(default)]
    pub units: Vec<String>,

    /// Databases never dumped individually.
    #[serde(default = "default_excluded")]
    pub excluded: Vec<String>,

    /// Dump program.
    #[serde(default = "default_dump_command")]
    pub dump_command: String,

    /// Client program used to list databases.
    #[serde(default = "default_client_command")]
    pub client_command: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: ExportStrategy::default(),
            host: default_host(),
            port: None,
            user: default_user(),
            password: None,
            units: Vec::new(),
            excluded: default_excluded(),
            dump_command: default_dump_command(),
            client_command: default_client_command(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStrategy {
    /// One dump containing every database.
    #[default]
    All,
    /// One dump per configured (or listed) database.
    Individual,
    /// One dump per listed database, minus the excluded ones.
    Except,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_excluded() -> Vec<String> {
    ["information_schema", "performance_schema", "mysql", "sys"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_dump_command() -> String {
    "mysqldump".to_string()
}

fn default_client_command() -> String {
    "mysql".to_string()
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database.host cannot be empty".into(),
            ));
        }
        if let Some(unit) = self.units.iter().find(|u| u.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "database.units contains an empty name: {unit:?}"
            )));
        }
        if self.strategy != ExportStrategy::Individual && !self.units.is_empty() {
            tracing::warn!(
                strategy = ?self.strategy,
                "database.units is only used with strategy = \"individual\""
            );
        }
        Ok(())
    }

    /// Connection arguments shared by the dump and list commands.
    pub fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.host),
            format!("--user={}", self.user),
        ];
        if let Some(port) = self.port {
            args.push(format!("--port={port}"));
        }
        args
    }

    pub fn is_excluded(&self, unit: &str) -> bool {
        self.excluded.iter().any(|e| e == unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert!(config.enabled);
        assert_eq!(config.strategy, ExportStrategy::All);
        assert!(config.is_excluded("information_schema"));
        assert!(config.is_excluded("sys"));
        assert!(!config.is_excluded("shop"));
    }

    #[test]
    fn test_connection_args() {
        let config = DatabaseConfig {
            host: "db".into(),
            user: "backup".into(),
            port: Some(3307),
            password: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(
            config.connection_args(),
            vec!["--host=db", "--user=backup", "--port=3307"]
        );
    }

    #[test]
    fn test_empty_unit_rejected() {
        let config = DatabaseConfig {
            strategy: ExportStrategy::Individual,
            units: vec!["shop".into(), " ".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
