//! Terminal progress renderer.
//!
//! On a TTY a single line is redrawn in place. Elsewhere (log files, CI,
//! systemd journal) only the 0/25/50/75/100 milestones are printed so the
//! output stays readable.

use std::io::{IsTerminal, Write};

use parking_lot::Mutex;

use super::{ProgressEvent, ProgressSink};
use crate::orchestrator::RunResult;

const BAR_WIDTH: usize = 20;
const MILESTONES: [u8; 5] = [0, 25, 50, 75, 100];

struct RenderState {
    out: Box<dyn Write + Send>,
    /// Line currently on screen without a trailing newline, if any.
    last_line: Option<String>,
}

pub struct TerminalProgress {
    state: Mutex<RenderState>,
    interactive: bool,
}

impl TerminalProgress {
    /// Render to stdout, redrawing in place when stdout is a terminal.
    pub fn stdout() -> Self {
        let interactive = std::io::stdout().is_terminal();
        Self::new(Box::new(std::io::stdout()), interactive)
    }

    pub fn new(out: Box<dyn Write + Send>, interactive: bool) -> Self {
        Self {
            state: Mutex::new(RenderState {
                out,
                last_line: None,
            }),
            interactive,
        }
    }

    /// Move off a half-drawn progress line before printing anything else.
    fn break_line(state: &mut RenderState) {
        if state.last_line.take().is_some() {
            let _ = writeln!(state.out);
        }
    }

    fn println(&self, message: &str) {
        let mut state = self.state.lock();
        if self.interactive {
            Self::break_line(&mut state);
        }
        let _ = writeln!(state.out, "{message}");
        let _ = state.out.flush();
    }
}

/// `[██████░░░░░░░░░░░░░░]`
pub fn render_bar(percent: u8) -> String {
    let filled = ((percent.min(100) as f64 / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled)
    )
}

fn render_line(event: &ProgressEvent) -> String {
    let mut line = format!(
        "{} {}% - {}",
        render_bar(event.percent),
        event.percent,
        event.operation
    );
    if !event.detail.is_empty() {
        line.push_str(" - ");
        line.push_str(&event.detail);
    }
    line
}

impl ProgressSink for TerminalProgress {
    fn update(&self, event: &ProgressEvent) {
        let line = render_line(event);
        let mut state = self.state.lock();

        if !self.interactive {
            if MILESTONES.contains(&event.percent) {
                let _ = writeln!(state.out, "{line}");
            }
            return;
        }

        if state.last_line.as_deref() == Some(line.as_str()) {
            return;
        }

        let _ = write!(state.out, "\r\x1b[2K{line}");
        if event.percent >= 100 {
            let _ = writeln!(state.out);
            state.last_line = None;
        } else {
            state.last_line = Some(line);
        }
        let _ = state.out.flush();
    }

    fn start(&self, operation: &str) {
        self.println(&format!("\n{operation}..."));
    }

    fn end(&self, operation: &str, success: bool) {
        let verdict = if success { "completed" } else { "failed" };
        self.println(&format!("{operation} {verdict}"));
    }

    fn failure(&self, context: &str, message: &str) {
        self.println(&format!("error: {context}: {message}"));
    }

    fn run_finished(&self, result: &RunResult) {
        if result.success {
            self.println(&format!(
                "Backup finished: {}/{} files uploaded in {}",
                result.files_processed,
                result.total_files,
                result.duration_display()
            ));
        } else {
            self.println(&format!(
                "Backup failed after {}: {}",
                result.duration_display(),
                result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string())
            ));
        }
    }
}
