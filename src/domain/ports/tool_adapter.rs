//! Tool adapter port.
//!
//! A [`ToolAdapter`] wraps one external service behind an opaque
//! `invoke(op, params)` surface. Adapters register with the tool router at
//! startup, grouped by cost tier; the router never inspects adapter
//! internals beyond this capability set.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::errors::ErrorClass;
use crate::domain::models::ToolTier;

/// Failure reported at the tool boundary.
///
/// Variants map onto the orchestrator's error classes; the router and
/// agent runtime never see provider-specific exception types.
#[derive(Debug, Error, Clone)]
pub enum ToolError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ToolError {
    /// Map this failure to its boundary classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Connection(_) => ErrorClass::Transient,
            Self::Server { status, .. } => {
                if *status >= 500 {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::InvalidRequest(_) | Self::Auth(_) | Self::NotFound(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Provider-supplied Retry-After hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Successful result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Structured result payload.
    pub value: serde_json::Value,
    /// Billed cost as reported by the provider (or cost-table estimate).
    pub cost_usd: f64,
}

impl ToolOutput {
    pub fn new(value: serde_json::Value, cost_usd: f64) -> Self {
        Self { value, cost_usd }
    }

    /// Number of result items when the payload is an array, else 1/0.
    pub fn result_count(&self) -> usize {
        match &self.value {
            serde_json::Value::Array(items) => items.len(),
            serde_json::Value::Null => 0,
            _ => 1,
        }
    }
}

/// Adapter over one external service.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Stable identifier (e.g. `"serper"`, `"hunter_io"`).
    fn tool_id(&self) -> &str;

    /// Cost tier this tool belongs to.
    fn tier(&self) -> ToolTier;

    /// Abstract operations this tool can serve.
    fn ops(&self) -> Vec<String>;

    /// Whether repeating an invocation is safe after an ambiguous failure.
    /// Non-idempotent tools must not be retried blindly.
    fn idempotent(&self) -> bool {
        true
    }

    /// Cost estimate used by the budget governor before dispatch.
    fn estimate_cost_usd(&self, _op: &str) -> f64 {
        match self.tier() {
            ToolTier::Free => 0.0,
            ToolTier::Cheap => 0.001,
            ToolTier::Moderate => 0.005,
            ToolTier::Expensive => 0.01,
        }
    }

    /// Invoke an operation. Must be safe to call concurrently.
    async fn invoke(&self, op: &str, params: &serde_json::Value) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(ToolError::Timeout(Duration::from_secs(5)).class(), ErrorClass::Transient);
        assert_eq!(
            ToolError::Server { status: 503, message: "busy".into() }.class(),
            ErrorClass::Transient
        );
        assert_eq!(
            ToolError::Server { status: 422, message: "bad".into() }.class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            ToolError::RateLimited { retry_after: None }.class(),
            ErrorClass::RateLimited
        );
        assert_eq!(ToolError::Auth("key".into()).class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_retry_after_hint() {
        let err = ToolError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(ToolError::Connection("reset".into()).retry_after(), None);
    }

    #[test]
    fn test_result_count() {
        assert_eq!(ToolOutput::new(serde_json::json!([1, 2, 3]), 0.0).result_count(), 3);
        assert_eq!(ToolOutput::new(serde_json::json!({"k": 1}), 0.0).result_count(), 1);
        assert_eq!(ToolOutput::new(serde_json::Value::Null, 0.0).result_count(), 0);
    }
}
