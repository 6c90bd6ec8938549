//! Scheduled database and file-group backups to a remote folder.
//!
//! A run exports databases through an external dump client, compresses
//! configured file groups, uploads the results, and prunes old backups in the
//! destination according to a retention policy. Every external party (dump
//! client, remote store, credentials, notifications) sits behind a trait.

pub mod archiver;
pub mod artifact;
pub mod auth;
pub mod config;
pub mod error;
pub mod exporter;
pub mod notify;
#[cfg(feature = "cli")]
pub mod observability;
pub mod orchestrator;
pub mod process;
pub mod progress;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod uploader;

pub use config::BackupConfig;
pub use error::{BackupError, BackupResult};
pub use orchestrator::{BackupKind, Orchestrator, RunResult};
