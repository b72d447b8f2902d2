//! Domain errors for the cadence orchestrator.
//!
//! Every failure that crosses a component boundary carries an [`ErrorClass`]
//! so that the agent runtime can decide retry vs abort and the workflow
//! engine can decide compensation vs continuation without inspecting
//! free-form messages.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failure classification observed at component boundaries.
///
/// Lower layers report outcomes in these terms; only the agent runtime
/// decides retry vs abort, and only the workflow engine decides
/// compensation vs continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Invalid config or schema mismatch. Non-retryable.
    Input,
    /// Network, 5xx, timeout. Retried per policy.
    Transient,
    /// 429 or limiter-rejected. Deferred, not counted as an attempt.
    RateLimited,
    /// Breaker rejected. Routed to the next tier, else deferred.
    CircuitOpen,
    /// 4xx validation, auth, not-found. Fails the agent.
    Permanent,
    /// Cost governor refused. Permanent for the agent, fails the run.
    BudgetDenied,
    /// Invariant violation. Fails the run, never silently recovered.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Permanent => "permanent",
            Self::BudgetDenied => "budget_denied",
            Self::Internal => "internal",
        }
    }

    /// Whether the agent runtime may retry after this class of failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited | Self::CircuitOpen)
    }
}

/// Domain-level errors for the cadence orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited by {tool_id}")]
    RateLimited {
        tool_id: String,
        retry_after: Option<Duration>,
    },

    #[error("Circuit open for {tool_id}")]
    CircuitOpen { tool_id: String },

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Budget denied: {0}")]
    BudgetDenied(String),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Gate not found: {0}")]
    GateNotFound(Uuid),

    #[error("Gate is not pending: {0}")]
    GateNotPending(Uuid),

    #[error("Gate already decided: {0}")]
    GateAlreadyDecided(Uuid),

    #[error("Agent not registered: {0}")]
    AgentNotRegistered(String),

    #[error("No tool registered for op: {0}")]
    NoToolForOp(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Scheduler queue full for kind {0}")]
    QueueFull(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Map this error to its boundary classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Input(_) => ErrorClass::Input,
            Self::Transient(_) | Self::Storage(_) | Self::QueueFull(_) => ErrorClass::Transient,
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            Self::BudgetDenied(_) => ErrorClass::BudgetDenied,
            Self::Internal(_) | Self::InvalidStateTransition { .. } => ErrorClass::Internal,
            _ => ErrorClass::Permanent,
        }
    }

    /// Whether this error is transient and could succeed on retry.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Whether this error permanently fails the owning agent.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Permanent | ErrorClass::Input | ErrorClass::BudgetDenied | ErrorClass::Internal
        )
    }
}

/// Convenience result alias used across the domain and service layers.
pub type DomainResult<T> = Result<T, OrchestratorError>;

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}
