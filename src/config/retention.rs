//! Remote retention configuration.
//!
//! Controls which previously uploaded backups are deleted after each run.
//! Only entries whose name matches one of `patterns` are ever considered,
//! so unrelated files sharing the folder are never touched.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! strategy = "count"      # or "age"
//! keep_last = 5
//! max_age_days = 30
//! patterns = ["all-databases-*.sql", "db-*.sql", "*.tar.gz"]
//! dry_run = false
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    /// Whether old backups are deleted at all.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Selection strategy.
    /// Default: count
    #[serde(default)]
    pub strategy: RetentionStrategy,

    /// Number of newest matching backups kept by the count strategy.
    /// Default: 5
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,

    /// Maximum age in days for the age strategy. 0 disables it, in which case
    /// the count strategy applies.
    #[serde(default)]
    pub max_age_days: u32,

    /// Glob patterns (`*`, `?`) a name must fully match to be eligible.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    /// If true, log what would be deleted without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RetentionStrategy::default(),
            keep_last: default_keep_last(),
            max_age_days: 0,
            patterns: default_patterns(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStrategy {
    /// Keep the newest `keep_last` entries.
    #[default]
    Count,
    /// Delete entries older than `max_age_days`.
    Age,
    /// Unrecognised value. Treated as `count`.
    #[serde(other)]
    Unknown,
}

/// The single rule a retention pass applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionRule {
    KeepLast(usize),
    OlderThanDays(u32),
}

fn default_true() -> bool {
    true
}

fn default_keep_last() -> usize {
    5
}

fn default_patterns() -> Vec<String> {
    ["all-databases-*.sql", "db-*.sql", "*.tar.gz"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy == RetentionStrategy::Unknown {
            tracing::warn!(
                keep_last = self.keep_last,
                "Unrecognised retention.strategy, falling back to count"
            );
        }
        if self.strategy == RetentionStrategy::Age && self.max_age_days == 0 {
            tracing::warn!(
                keep_last = self.keep_last,
                "retention.strategy = \"age\" without max_age_days, falling back to count"
            );
        }
        if self.enabled && self.patterns.is_empty() {
            return Err(ConfigError::Validation(
                "retention.patterns cannot be empty when retention is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Age wins only when explicitly selected with a non-zero age.
    pub fn rule(&self) -> RetentionRule {
        match self.strategy {
            RetentionStrategy::Age if self.max_age_days > 0 => {
                RetentionRule::OlderThanDays(self.max_age_days)
            }
            _ => RetentionRule::KeepLast(self.keep_last),
        }
    }
}
