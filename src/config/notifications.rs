use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Operator notification channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    /// Webhook receiving JSON messages for run progress and results.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

/// ```toml
/// [notifications.webhook]
/// url = "https://chat.example.com/api/webhooks/123/abc"
/// milestone_step = 25
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub url: String,

    /// Progress is posted each time an operation crosses a multiple of this
    /// many percent.
    #[serde(default = "default_milestone_step")]
    pub milestone_step: u8,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_milestone_step() -> u8 {
    25
}

fn default_timeout_secs() -> u64 {
    10
}

impl NotificationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(webhook) = &self.webhook else {
            return Ok(());
        };
        if !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://")) {
            return Err(ConfigError::Validation(
                "notifications.webhook.url must be an http(s) URL".into(),
            ));
        }
        if webhook.milestone_step == 0 || webhook.milestone_step > 100 {
            return Err(ConfigError::Validation(
                "notifications.webhook.milestone_step must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }

    /// The webhook, if configured and enabled.
    pub fn active_webhook(&self) -> Option<&WebhookConfig> {
        self.webhook.as_ref().filter(|w| w.enabled)
    }
}
