//! Operator notifications.
//!
//! A notifier is a [`ProgressSink`](crate::progress::ProgressSink) that turns
//! progress into short chat-style messages. Delivery problems are logged and
//! never reach the run.
//!
//! Shipped channels:
//! - **Webhook** (feature `webhook`): JSON posted to an incoming-webhook URL

#[cfg(feature = "webhook")]
mod webhook;

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
#[cfg(feature = "webhook")]
pub use webhook::{WebhookNotifier, deliver};

use crate::{orchestrator::RunResult, progress::render_bar};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[cfg(feature = "webhook")]
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
}

pub type NotifyResult<T> = Result<T, NotifyError>;

pub const COLOR_INFO: u32 = 0x3498db;
pub const COLOR_PROGRESS: u32 = 0xf1c40f;
pub const COLOR_SUCCESS: u32 = 0x2ecc71;
pub const COLOR_FAILURE: u32 = 0xe74c3c;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// One message as posted to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<NotificationField>,
}

impl Notification {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            color,
            fields: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(NotificationField {
            name: name.into(),
            value: value.into(),
            inline: true,
        });
        self
    }

    pub fn started(operation: &str) -> Self {
        Self::new(format!("Started: {operation}"), COLOR_INFO)
    }

    pub fn ended(operation: &str, success: bool) -> Self {
        if success {
            Self::new(format!("Completed: {operation}"), COLOR_SUCCESS)
        } else {
            Self::new(format!("Finished with errors: {operation}"), COLOR_FAILURE)
        }
    }

    pub fn progress(operation: &str, percent: u8, detail: &str) -> Self {
        let message = Self::new(operation, COLOR_PROGRESS)
            .description(format!("{} {percent}%", render_bar(percent)));
        if detail.is_empty() {
            message
        } else {
            message.field("Detail", detail)
        }
    }

    pub fn failure(context: &str, message: &str) -> Self {
        Self::new(format!("Error: {context}"), COLOR_FAILURE).description(message)
    }

    pub fn run_finished(result: &RunResult) -> Self {
        if result.success {
            Self::new("Backup completed", COLOR_SUCCESS)
                .field("Kind", result.kind.as_str())
                .field(
                    "Files",
                    format!("{}/{}", result.files_processed, result.total_files),
                )
                .field("Size", format!("{:.2} MB", result.total_size_mb()))
                .field("Duration", result.duration_display())
        } else {
            let reason = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            let mut message = Self::new("Backup failed", COLOR_FAILURE)
                .description(reason)
                .field("Kind", result.kind.as_str());
            if let Some(stage) = result.failed_stage {
                message = message.field("Stage", format!("{stage:?}"));
            }
            message.field("Duration", result.duration_display())
        }
    }
}

/// Remembers the last milestone sent per operation so each is sent once.
#[derive(Debug)]
pub struct MilestoneTracker {
    step: u8,
    last: HashMap<String, u8>,
}

impl MilestoneTracker {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.clamp(1, 100),
            last: HashMap::new(),
        }
    }

    /// Forget every operation, so their milestones are sent again.
    pub fn clear(&mut self) {
        self.last.clear();
    }

    /// The milestone `percent` reaches, if it was not sent yet.
    pub fn crossed(&mut self, operation: &str, percent: u8) -> Option<u8> {
        let milestone = percent.min(100) / self.step * self.step;
        match self.last.get(operation) {
            Some(&last) if milestone <= last => None,
            _ => {
                self.last.insert(operation.to_string(), milestone);
                Some(milestone)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        error::BackupError,
        orchestrator::{BackupKind, RunStage},
    };

    #[test]
    fn test_milestones_sent_once_each() {
        let mut tracker = MilestoneTracker::new(25);
        let sent: Vec<u8> = [0, 10, 30, 40, 60, 95, 100, 100]
            .into_iter()
            .filter_map(|p| tracker.crossed("op", p))
            .collect();
        assert_eq!(sent, vec![0, 25, 50, 75, 100]);
    }

    #[test]
    fn test_milestones_ignore_restarts_until_cleared() {
        let mut tracker = MilestoneTracker::new(25);
        assert_eq!(tracker.crossed("upload", 50), Some(50));
        assert_eq!(tracker.crossed("upload", 0), None);
        assert_eq!(tracker.crossed("other", 0), Some(0));

        tracker.clear();
        assert_eq!(tracker.crossed("upload", 0), Some(0));
    }

    #[test]
    fn test_run_finished_messages() {
        let json =
            |result: &RunResult| serde_json::to_value(Notification::run_finished(result)).unwrap();

        let ok = RunResult {
            kind: BackupKind::Full,
            success: true,
            files_processed: 2,
            total_files: 3,
            total_size_bytes: 3 * 1024 * 1024,
            local_files_removed: 3,
            remote_deleted: 0,
            duration: Duration::from_secs(65),
            stages: vec![RunStage::Done],
            failed_stage: None,
            error: None,
        };
        let body = json(&ok);
        assert_eq!(body["title"], "Backup completed");
        assert_eq!(body["color"], COLOR_SUCCESS);
        let fields = body["fields"].as_array().unwrap();
        assert!(fields.iter().any(|f| f["name"] == "Files" && f["value"] == "2/3"));
        assert!(fields.iter().any(|f| f["name"] == "Size" && f["value"] == "3.00 MB"));
        assert!(fields.iter().any(|f| f["name"] == "Duration" && f["value"] == "1m 5s"));

        let failed = RunResult {
            success: false,
            failed_stage: Some(RunStage::Compressing),
            error: Some(Arc::new(BackupError::EmptyResult)),
            ..ok
        };
        let body = json(&failed);
        assert_eq!(body["title"], "Backup failed");
        assert_eq!(body["description"], "No backup artifacts were produced");
        assert!(
            body["fields"]
                .as_array()
                .unwrap()
                .iter()
                .any(|f| f["name"] == "Stage" && f["value"] == "Compressing")
        );
    }

    #[test]
    fn test_progress_message_without_detail_has_no_fields() {
        let body = serde_json::to_value(Notification::progress("Uploading", 50, "")).unwrap();
        assert!(body.get("fields").is_none());
        assert!(body["description"].as_str().unwrap().ends_with("50%"));
    }
}
