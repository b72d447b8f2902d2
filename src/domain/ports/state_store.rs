//! State store port.
//!
//! Durable storage for runs, tasks, invocations, checkpoints, gates, the
//! budget ledger, and resilience snapshots. Writes are idempotent by id
//! (or checkpoint version); reads of a task plus its latest checkpoint are
//! atomic from the caller's perspective.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AgentTask, Checkpoint, HumanGate, InvocationKey, Phase, ToolInvocation, WorkflowRun,
};

/// Running budget totals derived from the append-only ledger.
#[derive(Debug, Clone, Default)]
pub struct BudgetTotals {
    pub run_total_usd: f64,
    pub by_tool_usd: HashMap<String, f64>,
    pub by_phase_usd: HashMap<String, f64>,
}

impl BudgetTotals {
    pub fn tool_total(&self, tool_id: &str) -> f64 {
        self.by_tool_usd.get(tool_id).copied().unwrap_or(0.0)
    }

    pub fn phase_total(&self, phase: Phase) -> f64 {
        self.by_phase_usd.get(phase.as_str()).copied().unwrap_or(0.0)
    }
}

/// Persisted circuit breaker state for warm restart.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub tool_id: String,
    /// closed | open | half_open
    pub state: String,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Persisted token bucket level for warm restart.
#[derive(Debug, Clone)]
pub struct LimiterSnapshot {
    pub tool_id: String,
    pub tokens: f64,
}

/// Durable storage behind the orchestrator.
#[async_trait]
pub trait StateStore: Send + Sync {
    // -- runs ---------------------------------------------------------------

    async fn insert_run(&self, run: &WorkflowRun) -> DomainResult<()>;

    async fn update_run(&self, run: &WorkflowRun) -> DomainResult<()>;

    async fn get_run(&self, run_id: Uuid) -> DomainResult<Option<WorkflowRun>>;

    /// List runs, optionally restricted to non-terminal statuses.
    async fn list_runs(&self, active_only: bool) -> DomainResult<Vec<WorkflowRun>>;

    // -- agent tasks --------------------------------------------------------

    async fn insert_task(&self, task: &AgentTask) -> DomainResult<()>;

    async fn update_task(&self, task: &AgentTask) -> DomainResult<()>;

    async fn get_task(&self, task_id: Uuid) -> DomainResult<Option<AgentTask>>;

    async fn list_tasks_by_run_and_phase(&self, run_id: Uuid, phase: Phase) -> DomainResult<Vec<AgentTask>>;

    async fn list_tasks_by_run(&self, run_id: Uuid) -> DomainResult<Vec<AgentTask>>;

    // -- tool invocations ---------------------------------------------------

    /// Record an invocation. Idempotent by `invocation_id`.
    async fn record_invocation(&self, invocation: &ToolInvocation) -> DomainResult<()>;

    /// Latest successful cached invocation for a cache key, if any.
    async fn get_cached_invocation(&self, key: &InvocationKey) -> DomainResult<Option<ToolInvocation>>;

    async fn list_invocations_by_task(&self, task_id: Uuid) -> DomainResult<Vec<ToolInvocation>>;

    // -- checkpoints --------------------------------------------------------

    /// Persist a checkpoint. Idempotent by (task_id, version); versions
    /// must be strictly increasing per task.
    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> DomainResult<()>;

    async fn latest_checkpoint(&self, task_id: Uuid) -> DomainResult<Option<Checkpoint>>;

    // -- human gates --------------------------------------------------------

    async fn insert_gate(&self, gate: &HumanGate) -> DomainResult<()>;

    async fn update_gate(&self, gate: &HumanGate) -> DomainResult<()>;

    async fn get_gate(&self, gate_id: Uuid) -> DomainResult<Option<HumanGate>>;

    async fn list_gates_by_run(&self, run_id: Uuid) -> DomainResult<Vec<HumanGate>>;

    // -- budget ledger ------------------------------------------------------

    /// Append one charge event to the ledger.
    async fn append_budget(&self, run_id: Uuid, tool_id: &str, phase: Phase, usd: f64) -> DomainResult<()>;

    async fn budget_totals(&self, run_id: Uuid) -> DomainResult<BudgetTotals>;

    // -- resilience snapshots -----------------------------------------------

    async fn save_breaker_snapshots(&self, snapshots: &[BreakerSnapshot]) -> DomainResult<()>;

    async fn load_breaker_snapshots(&self) -> DomainResult<Vec<BreakerSnapshot>>;

    async fn save_limiter_snapshots(&self, snapshots: &[LimiterSnapshot]) -> DomainResult<()>;

    async fn load_limiter_snapshots(&self) -> DomainResult<Vec<LimiterSnapshot>>;
}
