//! Progress reporting for long-running backup operations.
//!
//! Stages publish [`ProgressEvent`]s to a [`ProgressFanout`], which forwards
//! every event to each subscribed [`ProgressSink`]. Sinks own whatever state
//! they need (last rendered line, last milestone sent); nothing is shared
//! process-wide.

mod estimator;
mod terminal;

use std::sync::Arc;

pub use estimator::{CEILING, DEFAULT_SEED_FACTOR, ProgressEstimator};
pub use terminal::{TerminalProgress, render_bar};

use crate::orchestrator::RunResult;

/// A single progress update. Transient, never stored by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Percent complete, clamped to `0..=100`.
    pub percent: u8,
    /// Operation label, e.g. "Exporting database shop (1/2)".
    pub operation: String,
    /// Optional free-form detail.
    pub detail: String,
}

impl ProgressEvent {
    pub fn new(percent: u8, operation: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            operation: operation.into(),
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Observer of progress and operation brackets.
///
/// Implementations must not block for long: `update` is called for every
/// chunk streamed through an export, archive or upload. Delivery problems are
/// the sink's own business and must never fail the caller.
pub trait ProgressSink: Send + Sync {
    fn update(&self, event: &ProgressEvent);

    /// An operation (a stage or a batch within a stage) started.
    fn start(&self, operation: &str);

    /// An operation finished.
    fn end(&self, operation: &str, success: bool);

    /// A per-item failure worth surfacing to an operator.
    fn failure(&self, _context: &str, _message: &str) {}

    /// The run reached `Done` or `Failed`. Called at most once per run.
    fn run_finished(&self, _result: &RunResult) {}
}

/// Broadcasts to every subscribed sink.
#[derive(Clone, Default)]
pub struct ProgressFanout {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.subscribe(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn update(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.update(event);
        }
    }

    pub fn start(&self, operation: &str) {
        tracing::info!(operation, "Operation started");
        for sink in &self.sinks {
            sink.start(operation);
        }
    }

    pub fn end(&self, operation: &str, success: bool) {
        tracing::info!(operation, success, "Operation finished");
        for sink in &self.sinks {
            sink.end(operation, success);
        }
    }

    pub fn failure(&self, context: &str, message: &str) {
        for sink in &self.sinks {
            sink.failure(context, message);
        }
    }

    pub fn run_finished(&self, result: &RunResult) {
        for sink in &self.sinks {
            sink.run_finished(result);
        }
    }
}

impl std::fmt::Debug for ProgressFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressFanout")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
