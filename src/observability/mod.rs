//! Observability module.
//!
//! Structured logging via `tracing` with pretty, compact or JSON output.
//! Progress rendering for operators lives in [`crate::progress`].

mod tracing_init;

pub use tracing_init::*;
