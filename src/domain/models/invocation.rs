//! Tool invocation domain model.
//!
//! Every call routed to an external tool produces a [`ToolInvocation`]
//! record, retained for the run's lifetime for audit and result caching.
//! Results are cached by `(run_id, tool_id, op, params_hash)` with
//! single-flight semantics for concurrent identical requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Cost tier of a tool, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    /// In-process search/fetch, public APIs.
    Free,
    /// ~$0.001/call class.
    Cheap,
    /// ~$0.005/call class.
    Moderate,
    /// ~$0.01+/call class, semantic search.
    Expensive,
}

impl ToolTier {
    /// All tiers, lowest first.
    pub const ALL: [ToolTier; 4] = [Self::Free, Self::Cheap, Self::Moderate, Self::Expensive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Cheap => "cheap",
            Self::Moderate => "moderate",
            Self::Expensive => "expensive",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "cheap" => Some(Self::Cheap),
            "moderate" => Some(Self::Moderate),
            "expensive" => Some(Self::Expensive),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success,
    RetryableFailure,
    PermanentFailure,
    RateLimited,
    CircuitOpen,
    BudgetDenied,
}

impl InvocationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableFailure => "retryable_failure",
            Self::PermanentFailure => "permanent_failure",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::BudgetDenied => "budget_denied",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "retryable_failure" => Some(Self::RetryableFailure),
            "permanent_failure" => Some(Self::PermanentFailure),
            "rate_limited" => Some(Self::RateLimited),
            "circuit_open" => Some(Self::CircuitOpen),
            "budget_denied" => Some(Self::BudgetDenied),
            _ => None,
        }
    }
}

/// One call to an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: Uuid,
    pub task_id: Uuid,
    pub run_id: Uuid,
    pub tool_id: String,
    pub op: String,
    /// SHA-256 of the canonical params JSON.
    pub params_hash: String,
    pub tier: ToolTier,
    /// Result payload for successful invocations.
    pub result: Option<serde_json::Value>,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub outcome: InvocationOutcome,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Canonicalize a params value and hash it for cache keying.
///
/// Object keys are sorted recursively so two semantically identical
/// parameter maps always produce the same hash.
pub fn params_hash(params: &serde_json::Value) -> String {
    let canonical = canonicalize(params);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:064x}", hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            serde_json::Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Cache key for tool results: `(run_id, tool_id, op, params_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    pub run_id: Uuid,
    pub tool_id: String,
    pub op: String,
    pub params_hash: String,
}

impl InvocationKey {
    pub fn new(run_id: Uuid, tool_id: impl Into<String>, op: impl Into<String>, params: &serde_json::Value) -> Self {
        Self {
            run_id,
            tool_id: tool_id.into(),
            op: op.into(),
            params_hash: params_hash(params),
        }
    }
}
