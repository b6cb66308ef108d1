//! Severity-gated alert notifier: posts to an incoming-webhook URL, but
//! only for events at or above the alerting threshold, and only when a
//! webhook is configured.

use thiserror::Error;
use tracing::{debug, warn};

pub const SEVERITY_ALERT_THRESHOLD: i32 = 80;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("webhook request failed: {0}")]
    Request(String),
}

pub struct AlertNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl AlertNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    /// Posts `message` to the configured webhook if `severity >= 80`.
    /// No-ops (returning `Ok`) below the threshold or when unconfigured.
    pub async fn notify(&self, message: &str, severity: i32) -> Result<(), AlertError> {
        if severity < SEVERITY_ALERT_THRESHOLD {
            debug!(severity, "below alert threshold, not notifying");
            return Ok(());
        }

        let Some(url) = &self.webhook_url else {
            debug!("no webhook configured, not notifying");
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await
            .map_err(|e| AlertError::Request(e.to_string()))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "alert webhook returned non-success status");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn below_threshold_is_a_noop_even_without_webhook() {
        let notifier = AlertNotifier::new(None);
        let result = notifier.notify("test", 50).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unconfigured_webhook_is_a_noop_even_above_threshold() {
        let notifier = AlertNotifier::new(None);
        let result = notifier.notify("test", 95).await;
        assert!(result.is_ok());
    }
}
