//! Notification channel port.
//!
//! Used for gate announcements, budget warnings, and critical alerts.
//! At-most-once semantics: delivery failures are logged, never retried.

use async_trait::async_trait;

/// Severity of an outbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// One outbound message.
#[derive(Debug, Clone)]
pub struct Notification {
    pub severity: Severity,
    pub subject: String,
    pub body: String,
    /// Deep link to the relevant artifact (gate, run), if any.
    pub link: Option<String>,
}

impl Notification {
    pub fn new(severity: Severity, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            severity,
            subject: subject.into(),
            body: body.into(),
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Outbound channel for human-facing notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Send a notification to `target` (channel-specific address).
    /// At-most-once: implementations log failures and return.
    async fn send(&self, target: Option<&str>, notification: &Notification);
}

/// Channel that writes notifications to the tracing log. The default when
/// no webhook is configured, and the fallback target in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send(&self, target: Option<&str>, notification: &Notification) {
        match notification.severity {
            Severity::Info => tracing::info!(
                target = target.unwrap_or("-"),
                subject = %notification.subject,
                "{}",
                notification.body
            ),
            Severity::Warning => tracing::warn!(
                target = target.unwrap_or("-"),
                subject = %notification.subject,
                "{}",
                notification.body
            ),
            Severity::Critical => tracing::error!(
                target = target.unwrap_or("-"),
                subject = %notification.subject,
                "{}",
                notification.body
            ),
        }
    }
}
