//! Remote retention.
//!
//! After uploads, old backups in the destination folder are pruned:
//! 1. The folder is listed fresh (newest first); nothing is cached between passes
//! 2. Only names matching a configured glob are eligible
//! 3. Either the newest `keep_last` are kept, or everything older than
//!    `max_age_days` goes
//! 4. Each selected entry is deleted independently
//!
//! Supports dry-run mode for testing retention policies.

mod engine;
mod glob;

pub use engine::{DeletionOutcome, RetentionEngine, RetentionReport, select_for_deletion};
pub use glob::NamePatterns;
