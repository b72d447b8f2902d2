//! Webhook notification channel.
//!
//! Posts notifications as JSON to a configured URL. At-most-once: send
//! failures are logged and dropped, never retried.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::ports::{Notification, NotificationChannel};

/// HTTP webhook notifier.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    async fn send(&self, target: Option<&str>, notification: &Notification) {
        let payload = serde_json::json!({
            "severity": notification.severity.as_str(),
            "subject": notification.subject,
            "body": notification.body,
            "link": notification.link,
            "target": target,
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    subject = %notification.subject,
                    "webhook notification rejected"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, subject = %notification.subject, "webhook notification failed");
            }
        }
    }
}
