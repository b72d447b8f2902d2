//! In-memory state store.
//!
//! Backs unit tests and the demo command. Semantics mirror the sqlite
//! store: idempotent writes, strictly increasing checkpoint versions, and
//! success-only invocation caching.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainResult, OrchestratorError};
use crate::domain::models::{
    AgentTask, Checkpoint, HumanGate, InvocationKey, InvocationOutcome, Phase, ToolInvocation,
    WorkflowRun,
};
use crate::domain::ports::{BreakerSnapshot, BudgetTotals, LimiterSnapshot, StateStore};

#[derive(Debug, Clone)]
struct LedgerEvent {
    run_id: Uuid,
    tool_id: String,
    phase: Phase,
    usd: f64,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, WorkflowRun>,
    tasks: HashMap<Uuid, AgentTask>,
    invocations: HashMap<Uuid, ToolInvocation>,
    /// Success cache: key -> invocation_id.
    invocation_cache: HashMap<InvocationKey, Uuid>,
    checkpoints: HashMap<Uuid, BTreeMap<u64, Checkpoint>>,
    gates: HashMap<Uuid, HumanGate>,
    ledger: Vec<LedgerEvent>,
    breaker_snapshots: Vec<BreakerSnapshot>,
    limiter_snapshots: Vec<LimiterSnapshot>,
}

/// In-memory [`StateStore`] implementation.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn insert_run(&self, run: &WorkflowRun) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        inner.runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &WorkflowRun) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(&run.run_id) {
            return Err(OrchestratorError::RunNotFound(run.run_id));
        }
        inner.runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> DomainResult<Option<WorkflowRun>> {
        Ok(self.inner.read().await.runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, active_only: bool) -> DomainResult<Vec<WorkflowRun>> {
        let inner = self.inner.read().await;
        let mut runs: Vec<WorkflowRun> = inner
            .runs
            .values()
            .filter(|r| !active_only || !r.status.is_terminal())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn insert_task(&self, task: &AgentTask) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &AgentTask) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&task.task_id) {
            return Err(OrchestratorError::TaskNotFound(task.task_id));
        }
        inner.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> DomainResult<Option<AgentTask>> {
        Ok(self.inner.read().await.tasks.get(&task_id).cloned())
    }

    async fn list_tasks_by_run_and_phase(&self, run_id: Uuid, phase: Phase) -> DomainResult<Vec<AgentTask>> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<AgentTask> = inner
            .tasks
            .values()
            .filter(|t| t.run_id == run_id && t.phase == phase)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn list_tasks_by_run(&self, run_id: Uuid) -> DomainResult<Vec<AgentTask>> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<AgentTask> = inner
            .tasks
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn record_invocation(&self, invocation: &ToolInvocation) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        if invocation.outcome == InvocationOutcome::Success && invocation.result.is_some() {
            let key = InvocationKey {
                run_id: invocation.run_id,
                tool_id: invocation.tool_id.clone(),
                op: invocation.op.clone(),
                params_hash: invocation.params_hash.clone(),
            };
            inner.invocation_cache.entry(key).or_insert(invocation.invocation_id);
        }
        inner.invocations.insert(invocation.invocation_id, invocation.clone());
        Ok(())
    }

    async fn get_cached_invocation(&self, key: &InvocationKey) -> DomainResult<Option<ToolInvocation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .invocation_cache
            .get(key)
            .and_then(|id| inner.invocations.get(id))
            .cloned())
    }

    async fn list_invocations_by_task(&self, task_id: Uuid) -> DomainResult<Vec<ToolInvocation>> {
        let inner = self.inner.read().await;
        let mut invocations: Vec<ToolInvocation> = inner
            .invocations
            .values()
            .filter(|i| i.task_id == task_id)
            .cloned()
            .collect();
        invocations.sort_by_key(|i| i.created_at);
        Ok(invocations)
    }

    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        let versions = inner.checkpoints.entry(checkpoint.task_id).or_default();
        let latest = versions.keys().next_back().copied().unwrap_or(0);
        if checkpoint.version < latest && !versions.contains_key(&checkpoint.version) {
            return Err(OrchestratorError::Internal(format!(
                "checkpoint version regression for task {}: {} < {}",
                checkpoint.task_id, checkpoint.version, latest
            )));
        }
        versions.insert(checkpoint.version, checkpoint.clone());
        Ok(())
    }

    async fn latest_checkpoint(&self, task_id: Uuid) -> DomainResult<Option<Checkpoint>> {
        let inner = self.inner.read().await;
        Ok(inner
            .checkpoints
            .get(&task_id)
            .and_then(|versions| versions.values().next_back())
            .cloned())
    }

    async fn insert_gate(&self, gate: &HumanGate) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        inner.gates.insert(gate.gate_id, gate.clone());
        Ok(())
    }

    async fn update_gate(&self, gate: &HumanGate) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.gates.contains_key(&gate.gate_id) {
            return Err(OrchestratorError::GateNotFound(gate.gate_id));
        }
        inner.gates.insert(gate.gate_id, gate.clone());
        Ok(())
    }

    async fn get_gate(&self, gate_id: Uuid) -> DomainResult<Option<HumanGate>> {
        Ok(self.inner.read().await.gates.get(&gate_id).cloned())
    }

    async fn list_gates_by_run(&self, run_id: Uuid) -> DomainResult<Vec<HumanGate>> {
        let inner = self.inner.read().await;
        let mut gates: Vec<HumanGate> = inner
            .gates
            .values()
            .filter(|g| g.run_id == run_id)
            .cloned()
            .collect();
        gates.sort_by_key(|g| g.created_at);
        Ok(gates)
    }

    async fn append_budget(&self, run_id: Uuid, tool_id: &str, phase: Phase, usd: f64) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        inner.ledger.push(LedgerEvent {
            run_id,
            tool_id: tool_id.to_string(),
            phase,
            usd,
        });
        Ok(())
    }

    async fn budget_totals(&self, run_id: Uuid) -> DomainResult<BudgetTotals> {
        let inner = self.inner.read().await;
        let mut totals = BudgetTotals::default();
        for event in inner.ledger.iter().filter(|e| e.run_id == run_id) {
            totals.run_total_usd += event.usd;
            *totals.by_tool_usd.entry(event.tool_id.clone()).or_insert(0.0) += event.usd;
            *totals
                .by_phase_usd
                .entry(event.phase.as_str().to_string())
                .or_insert(0.0) += event.usd;
        }
        Ok(totals)
    }

    async fn save_breaker_snapshots(&self, snapshots: &[BreakerSnapshot]) -> DomainResult<()> {
        self.inner.write().await.breaker_snapshots = snapshots.to_vec();
        Ok(())
    }

    async fn load_breaker_snapshots(&self) -> DomainResult<Vec<BreakerSnapshot>> {
        Ok(self.inner.read().await.breaker_snapshots.clone())
    }

    async fn save_limiter_snapshots(&self, snapshots: &[LimiterSnapshot]) -> DomainResult<()> {
        self.inner.write().await.limiter_snapshots = snapshots.to_vec();
        Ok(())
    }

    async fn load_limiter_snapshots(&self) -> DomainResult<Vec<LimiterSnapshot>> {
        Ok(self.inner.read().await.limiter_snapshots.clone())
    }
}
