//! Agent logic port.
//!
//! Agent behavior (prompting, parsing, business rules) lives behind
//! [`AgentLogic`]. The runtime re-enters [`AgentLogic::step`] on each
//! resumption; the step function never blocks on tools itself, it returns
//! [`StepOutcome::NeedsTools`] and the runtime dispatches, suspends, and
//! re-enters with the results. This keeps checkpoint boundaries explicit.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainResult, ErrorClass};
use crate::domain::models::Phase;

/// One tool request issued from a step.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolRequest {
    /// Abstract operation name (e.g. `"web_search"`).
    pub op: String,
    /// Operation parameters.
    pub params: serde_json::Value,
}

impl ToolRequest {
    pub fn new(op: impl Into<String>, params: serde_json::Value) -> Self {
        Self { op: op.into(), params }
    }
}

/// How many of a step's tool requests must resolve before re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Re-enter as soon as any request resolves.
    Any,
    /// Wait for every request.
    All,
    /// Wait for at least `k` requests.
    Quorum(usize),
}

impl WaitPolicy {
    /// Number of resolutions required out of `total` requests.
    pub fn required(&self, total: usize) -> usize {
        match self {
            Self::Any => 1.min(total),
            Self::All => total,
            Self::Quorum(k) => (*k).min(total),
        }
    }
}

/// Failure surfaced to the agent for one tool request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolFailure {
    pub class: ErrorClass,
    pub message: String,
    /// Provider Retry-After hint for rate-limited failures, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ToolFailure {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }
}

/// Result of one tool request, presented in request-index order.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// Index of the originating request within the step.
    pub request_index: usize,
    pub result: Result<serde_json::Value, ToolFailure>,
}

impl ToolCallResult {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// What a step asks the runtime to do next.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Dispatch tool requests and re-enter when the wait policy is met.
    NeedsTools {
        requests: Vec<ToolRequest>,
        wait: WaitPolicy,
    },
    /// Persist `state` durably, then re-enter immediately.
    CheckpointAndContinue { state: serde_json::Value },
    /// The agent finished; `output` becomes the task's output.
    Done { output: serde_json::Value },
    /// Non-retryable failure observed by the agent itself.
    Abort { reason: String },
}

/// Execution context handed to every step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub phase: Phase,
    pub agent_name: String,
    pub attempt: u32,
    /// Cooperative cancellation; honored at every suspension point.
    pub cancel: CancellationToken,
}

/// Stateful agent behavior behind the runtime.
#[async_trait]
pub trait AgentLogic: Send + Sync {
    /// Pipeline agent name this logic implements.
    fn name(&self) -> &str;

    /// Validate the task input before the first step. A schema mismatch
    /// here fails the task without consuming an attempt.
    fn validate_input(&self, _input: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }

    /// Advance the agent by one step.
    ///
    /// `state` is the last checkpointed state (or the task input envelope
    /// on first entry); `tool_results` carries the results of the previous
    /// `NeedsTools` outcome in request-index order, empty otherwise.
    async fn step(
        &self,
        ctx: &StepContext,
        state: &serde_json::Value,
        tool_results: &[ToolCallResult],
    ) -> DomainResult<StepOutcome>;

    /// Undo this agent's committed side effects during saga compensation.
    /// Called only for agents that reached completion.
    async fn compensate(&self, _ctx: &StepContext, _output: &serde_json::Value) -> DomainResult<()> {
        Ok(())
    }
}
