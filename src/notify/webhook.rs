use std::{future::Future, time::Duration};

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;

use super::{MilestoneTracker, Notification, NotifyError, NotifyResult};
use crate::{
    config::WebhookConfig,
    orchestrator::RunResult,
    progress::{ProgressEvent, ProgressSink},
};

/// Posts notifications to an incoming-webhook URL.
///
/// Sink callbacks only enqueue; a background worker does the HTTP calls in
/// order, so a slow or broken endpoint never stalls a backup.
pub struct WebhookNotifier {
    tx: mpsc::UnboundedSender<Notification>,
    milestones: Mutex<MilestoneTracker>,
}

impl WebhookNotifier {
    /// Create a notifier.
    ///
    /// # Returns
    /// A tuple of (WebhookNotifier, background delivery task). The task ends
    /// once the notifier is dropped and the queue is drained.
    pub fn new(
        config: &WebhookConfig,
    ) -> NotifyResult<(Self, impl Future<Output = ()> + Send + 'static)> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel::<Notification>();

        let notifier = Self {
            tx,
            milestones: Mutex::new(MilestoneTracker::new(config.milestone_step)),
        };
        let worker = Self::run_delivery_worker(rx, client, config.url.clone());
        Ok((notifier, worker))
    }

    async fn run_delivery_worker(
        mut rx: mpsc::UnboundedReceiver<Notification>,
        client: Client,
        url: String,
    ) {
        while let Some(message) = rx.recv().await {
            match deliver(&client, &url, &message).await {
                Ok(()) => tracing::debug!(title = %message.title, "Notification delivered"),
                Err(e) => tracing::warn!(
                    title = %message.title,
                    error = %e,
                    "Failed to deliver notification"
                ),
            }
        }
        tracing::debug!("Notification worker stopped");
    }

    fn enqueue(&self, message: Notification) {
        if self.tx.send(message).is_err() {
            tracing::debug!("Notification worker gone, dropping message");
        }
    }
}

/// POST one message as JSON. Any non-2xx status is an error.
pub async fn deliver(client: &Client, url: &str, message: &Notification) -> NotifyResult<()> {
    let response = client.post(url).json(message).send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Status {
        status: status.as_u16(),
        body,
    })
}

impl ProgressSink for WebhookNotifier {
    fn update(&self, event: &ProgressEvent) {
        let crossed = self
            .milestones
            .lock()
            .crossed(&event.operation, event.percent);
        if let Some(milestone) = crossed {
            self.enqueue(Notification::progress(
                &event.operation,
                milestone,
                &event.detail,
            ));
        }
    }

    fn start(&self, operation: &str) {
        // Labels repeat across runs; each stage starts counting afresh.
        self.milestones.lock().clear();
        self.enqueue(Notification::started(operation));
    }

    fn end(&self, operation: &str, success: bool) {
        self.enqueue(Notification::ended(operation, success));
    }

    fn failure(&self, context: &str, message: &str) {
        self.enqueue(Notification::failure(context, message));
    }

    fn run_finished(&self, result: &RunResult) {
        self.enqueue(Notification::run_finished(result));
    }
}
