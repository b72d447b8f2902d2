//! SQLite implementation of the state store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainResult, OrchestratorError};
use crate::domain::models::{
    AgentTask, Checkpoint, GateStatus, HumanGate, InvocationKey, InvocationOutcome, Phase,
    RunConfig, RunStatus, TaskState, ToolInvocation, ToolTier, WorkflowRun,
};
use crate::domain::ports::{BreakerSnapshot, BudgetTotals, LimiterSnapshot, StateStore};

/// SQLite-backed [`StateStore`].
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, OrchestratorError> {
    Uuid::parse_str(s).map_err(|e| OrchestratorError::Storage(format!("invalid uuid {s}: {e}")))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, OrchestratorError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| OrchestratorError::Storage(format!("invalid timestamp {s}: {e}")))
}

fn parse_opt_time(s: Option<&str>) -> Result<Option<DateTime<Utc>>, OrchestratorError> {
    s.map(parse_time).transpose()
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    phase: String,
    status: String,
    config: String,
    budget_cap_usd: f64,
    spend_usd: f64,
    last_error: Option<String>,
    started_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<RunRow> for WorkflowRun {
    type Error = OrchestratorError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let config: RunConfig = serde_json::from_str(&row.config)?;
        Ok(WorkflowRun {
            run_id: parse_uuid(&row.run_id)?,
            phase: Phase::from_str(&row.phase)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown phase {}", row.phase)))?,
            status: RunStatus::from_str(&row.status)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown status {}", row.status)))?,
            config,
            budget_cap_usd: row.budget_cap_usd,
            spend_usd: row.spend_usd,
            last_error: row.last_error,
            started_at: parse_time(&row.started_at)?,
            updated_at: parse_time(&row.updated_at)?,
            completed_at: parse_opt_time(row.completed_at.as_deref())?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    run_id: String,
    agent_name: String,
    phase: String,
    state: String,
    attempt: i64,
    input: String,
    output: Option<String>,
    checkpoint_version: i64,
    last_error: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for AgentTask {
    type Error = OrchestratorError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(AgentTask {
            task_id: parse_uuid(&row.task_id)?,
            run_id: parse_uuid(&row.run_id)?,
            agent_name: row.agent_name,
            phase: Phase::from_str(&row.phase)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown phase {}", row.phase)))?,
            state: TaskState::from_str(&row.state)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown state {}", row.state)))?,
            attempt: row.attempt as u32,
            input: serde_json::from_str(&row.input)?,
            output: row.output.as_deref().map(serde_json::from_str).transpose()?,
            checkpoint_version: row.checkpoint_version as u64,
            last_error: row.last_error,
            started_at: parse_opt_time(row.started_at.as_deref())?,
            completed_at: parse_opt_time(row.completed_at.as_deref())?,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvocationRow {
    invocation_id: String,
    task_id: String,
    run_id: String,
    tool_id: String,
    op: String,
    params_hash: String,
    tier: String,
    result: Option<String>,
    cost_usd: f64,
    latency_ms: i64,
    outcome: String,
    error: Option<String>,
    created_at: String,
}

impl TryFrom<InvocationRow> for ToolInvocation {
    type Error = OrchestratorError;

    fn try_from(row: InvocationRow) -> Result<Self, Self::Error> {
        Ok(ToolInvocation {
            invocation_id: parse_uuid(&row.invocation_id)?,
            task_id: parse_uuid(&row.task_id)?,
            run_id: parse_uuid(&row.run_id)?,
            tool_id: row.tool_id,
            op: row.op,
            params_hash: row.params_hash,
            tier: ToolTier::from_str(&row.tier)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown tier {}", row.tier)))?,
            result: row.result.as_deref().map(serde_json::from_str).transpose()?,
            cost_usd: row.cost_usd,
            latency_ms: row.latency_ms as u64,
            outcome: InvocationOutcome::from_str(&row.outcome)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown outcome {}", row.outcome)))?,
            error: row.error,
            created_at: parse_time(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GateRow {
    gate_id: String,
    run_id: String,
    phase: String,
    artifact: String,
    status: String,
    deadline: String,
    approver_id: Option<String>,
    notes: Option<String>,
    created_at: String,
    decided_at: Option<String>,
}

impl TryFrom<GateRow> for HumanGate {
    type Error = OrchestratorError;

    fn try_from(row: GateRow) -> Result<Self, Self::Error> {
        Ok(HumanGate {
            gate_id: parse_uuid(&row.gate_id)?,
            run_id: parse_uuid(&row.run_id)?,
            phase: Phase::from_str(&row.phase)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown phase {}", row.phase)))?,
            artifact: serde_json::from_str(&row.artifact)?,
            status: GateStatus::from_str(&row.status)
                .ok_or_else(|| OrchestratorError::Storage(format!("unknown status {}", row.status)))?,
            deadline: parse_time(&row.deadline)?,
            approver_id: row.approver_id,
            notes: row.notes,
            created_at: parse_time(&row.created_at)?,
            decided_at: parse_opt_time(row.decided_at.as_deref())?,
        })
    }
}

// ---------------------------------------------------------------------------
// StateStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn insert_run(&self, run: &WorkflowRun) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO runs
               (run_id, phase, status, config, budget_cap_usd, spend_usd, last_error,
                started_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.run_id.to_string())
        .bind(run.phase.as_str())
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.config)?)
        .bind(run.budget_cap_usd)
        .bind(run.spend_usd)
        .bind(&run.last_error)
        .bind(run.started_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_run(&self, run: &WorkflowRun) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE runs SET phase = ?, status = ?, spend_usd = ?, last_error = ?,
               updated_at = ?, completed_at = ? WHERE run_id = ?"#,
        )
        .bind(run.phase.as_str())
        .bind(run.status.as_str())
        .bind(run.spend_usd)
        .bind(&run.last_error)
        .bind(Utc::now().to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.run_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::RunNotFound(run.run_id));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> DomainResult<Option<WorkflowRun>> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_runs(&self, active_only: bool) -> DomainResult<Vec<WorkflowRun>> {
        let rows: Vec<RunRow> = if active_only {
            sqlx::query_as(
                "SELECT * FROM runs WHERE status NOT IN ('completed', 'failed', 'cancelled')
                 ORDER BY started_at",
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT * FROM runs ORDER BY started_at")
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_task(&self, task: &AgentTask) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO tasks
               (task_id, run_id, agent_name, phase, state, attempt, input, output,
                checkpoint_version, last_error, started_at, completed_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.task_id.to_string())
        .bind(task.run_id.to_string())
        .bind(&task.agent_name)
        .bind(task.phase.as_str())
        .bind(task.state.as_str())
        .bind(task.attempt as i64)
        .bind(serde_json::to_string(&task.input)?)
        .bind(task.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(task.checkpoint_version as i64)
        .bind(&task.last_error)
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(&self, task: &AgentTask) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE tasks SET state = ?, attempt = ?, output = ?, checkpoint_version = ?,
               last_error = ?, started_at = ?, completed_at = ?, updated_at = ?
               WHERE task_id = ?"#,
        )
        .bind(task.state.as_str())
        .bind(task.attempt as i64)
        .bind(task.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(task.checkpoint_version as i64)
        .bind(&task.last_error)
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(task.task_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::TaskNotFound(task.task_id));
        }
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> DomainResult<Option<AgentTask>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_tasks_by_run_and_phase(&self, run_id: Uuid, phase: Phase) -> DomainResult<Vec<AgentTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE run_id = ? AND phase = ? ORDER BY created_at",
        )
        .bind(run_id.to_string())
        .bind(phase.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_tasks_by_run(&self, run_id: Uuid) -> DomainResult<Vec<AgentTask>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE run_id = ? ORDER BY created_at")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_invocation(&self, invocation: &ToolInvocation) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO invocations
               (invocation_id, task_id, run_id, tool_id, op, params_hash, tier, result,
                cost_usd, latency_ms, outcome, error, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(invocation.invocation_id.to_string())
        .bind(invocation.task_id.to_string())
        .bind(invocation.run_id.to_string())
        .bind(&invocation.tool_id)
        .bind(&invocation.op)
        .bind(&invocation.params_hash)
        .bind(invocation.tier.as_str())
        .bind(invocation.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(invocation.cost_usd)
        .bind(invocation.latency_ms as i64)
        .bind(invocation.outcome.as_str())
        .bind(&invocation.error)
        .bind(invocation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cached_invocation(&self, key: &InvocationKey) -> DomainResult<Option<ToolInvocation>> {
        let row: Option<InvocationRow> = sqlx::query_as(
            r#"SELECT * FROM invocations
               WHERE run_id = ? AND tool_id = ? AND op = ? AND params_hash = ?
                 AND outcome = 'success' AND result IS NOT NULL
               ORDER BY created_at LIMIT 1"#,
        )
        .bind(key.run_id.to_string())
        .bind(&key.tool_id)
        .bind(&key.op)
        .bind(&key.params_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_invocations_by_task(&self, task_id: Uuid) -> DomainResult<Vec<ToolInvocation>> {
        let rows: Vec<InvocationRow> =
            sqlx::query_as("SELECT * FROM invocations WHERE task_id = ? ORDER BY created_at")
                .bind(task_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        let latest: Option<(i64,)> =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM checkpoints WHERE task_id = ?")
                .bind(checkpoint.task_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        let latest = latest.map(|(v,)| v).unwrap_or(0) as u64;

        if checkpoint.version < latest {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM checkpoints WHERE task_id = ? AND version = ?")
                    .bind(checkpoint.task_id.to_string())
                    .bind(checkpoint.version as i64)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(OrchestratorError::Internal(format!(
                    "checkpoint version regression for task {}: {} < {latest}",
                    checkpoint.task_id, checkpoint.version
                )));
            }
        }

        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (task_id, version, payload, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(checkpoint.task_id.to_string())
        .bind(checkpoint.version as i64)
        .bind(&checkpoint.payload)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_checkpoint(&self, task_id: Uuid) -> DomainResult<Option<Checkpoint>> {
        let row: Option<(i64, Vec<u8>, String)> = sqlx::query_as(
            "SELECT version, payload, created_at FROM checkpoints
             WHERE task_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((version, payload, created_at)) => Ok(Some(Checkpoint {
                task_id,
                version: version as u64,
                payload,
                created_at: parse_time(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn insert_gate(&self, gate: &HumanGate) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO gates
               (gate_id, run_id, phase, artifact, status, deadline, approver_id, notes,
                created_at, decided_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(gate.gate_id.to_string())
        .bind(gate.run_id.to_string())
        .bind(gate.phase.as_str())
        .bind(serde_json::to_string(&gate.artifact)?)
        .bind(gate.status.as_str())
        .bind(gate.deadline.to_rfc3339())
        .bind(&gate.approver_id)
        .bind(&gate.notes)
        .bind(gate.created_at.to_rfc3339())
        .bind(gate.decided_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_gate(&self, gate: &HumanGate) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE gates SET status = ?, approver_id = ?, notes = ?, decided_at = ? WHERE gate_id = ?",
        )
        .bind(gate.status.as_str())
        .bind(&gate.approver_id)
        .bind(&gate.notes)
        .bind(gate.decided_at.map(|t| t.to_rfc3339()))
        .bind(gate.gate_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::GateNotFound(gate.gate_id));
        }
        Ok(())
    }

    async fn get_gate(&self, gate_id: Uuid) -> DomainResult<Option<HumanGate>> {
        let row: Option<GateRow> = sqlx::query_as("SELECT * FROM gates WHERE gate_id = ?")
            .bind(gate_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_gates_by_run(&self, run_id: Uuid) -> DomainResult<Vec<HumanGate>> {
        let rows: Vec<GateRow> =
            sqlx::query_as("SELECT * FROM gates WHERE run_id = ? ORDER BY created_at")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn append_budget(&self, run_id: Uuid, tool_id: &str, phase: Phase, usd: f64) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO ledger (run_id, tool_id, phase, usd, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id.to_string())
        .bind(tool_id)
        .bind(phase.as_str())
        .bind(usd)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn budget_totals(&self, run_id: Uuid) -> DomainResult<BudgetTotals> {
        let mut totals = BudgetTotals::default();

        let total: Option<(f64,)> =
            sqlx::query_as("SELECT COALESCE(SUM(usd), 0.0) FROM ledger WHERE run_id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        totals.run_total_usd = total.map(|(v,)| v).unwrap_or(0.0);

        let by_tool: Vec<(String, f64)> =
            sqlx::query_as("SELECT tool_id, SUM(usd) FROM ledger WHERE run_id = ? GROUP BY tool_id")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        totals.by_tool_usd = by_tool.into_iter().collect();

        let by_phase: Vec<(String, f64)> =
            sqlx::query_as("SELECT phase, SUM(usd) FROM ledger WHERE run_id = ? GROUP BY phase")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        totals.by_phase_usd = by_phase.into_iter().collect();

        Ok(totals)
    }

    async fn save_breaker_snapshots(&self, snapshots: &[BreakerSnapshot]) -> DomainResult<()> {
        for snapshot in snapshots {
            sqlx::query(
                r#"INSERT OR REPLACE INTO breakers
                   (tool_id, state, failure_count, success_count, opened_at, saved_at)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&snapshot.tool_id)
            .bind(&snapshot.state)
            .bind(snapshot.failure_count as i64)
            .bind(snapshot.success_count as i64)
            .bind(snapshot.opened_at.map(|t| t.to_rfc3339()))
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn load_breaker_snapshots(&self) -> DomainResult<Vec<BreakerSnapshot>> {
        let rows: Vec<(String, String, i64, i64, Option<String>)> = sqlx::query_as(
            "SELECT tool_id, state, failure_count, success_count, opened_at FROM breakers",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(tool_id, state, failure_count, success_count, opened_at)| {
                Ok(BreakerSnapshot {
                    tool_id,
                    state,
                    failure_count: failure_count as u32,
                    success_count: success_count as u32,
                    opened_at: parse_opt_time(opened_at.as_deref())?,
                })
            })
            .collect()
    }

    async fn save_limiter_snapshots(&self, snapshots: &[LimiterSnapshot]) -> DomainResult<()> {
        for snapshot in snapshots {
            sqlx::query("INSERT OR REPLACE INTO limiters (tool_id, tokens, saved_at) VALUES (?, ?, ?)")
                .bind(&snapshot.tool_id)
                .bind(snapshot.tokens)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn load_limiter_snapshots(&self) -> DomainResult<Vec<LimiterSnapshot>> {
        let rows: Vec<(String, f64)> = sqlx::query_as("SELECT tool_id, tokens FROM limiters")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(tool_id, tokens)| LimiterSnapshot { tool_id, tokens })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::create_test_pool;
    use crate::infrastructure::database::migrations::{all_embedded_migrations, Migrator};
    use serde_json::json;

    async fn make_store() -> SqliteStateStore {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        SqliteStateStore::new(pool)
    }

    fn make_run() -> WorkflowRun {
        WorkflowRun::new(RunConfig {
            campaign_name: "q3".to_string(),
            input: json!({"niche": "saas"}),
            budget_cap_usd: 25.0,
            notification_target: Some("#outreach".to_string()),
        })
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let store = make_store().await;
        let mut run = make_run();
        store.insert_run(&run).await.unwrap();

        run.status = RunStatus::Running;
        run.phase = Phase::LeadAcquisition;
        run.spend_usd = 1.25;
        store.update_run(&run).await.unwrap();

        let loaded = store.get_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.phase, Phase::LeadAcquisition);
        assert!((loaded.spend_usd - 1.25).abs() < f64::EPSILON);
        assert_eq!(loaded.config.campaign_name, "q3");
    }

    #[tokio::test]
    async fn test_list_runs_active_filter() {
        let store = make_store().await;
        let mut active = make_run();
        store.insert_run(&active).await.unwrap();

        let mut done = make_run();
        done.status = RunStatus::Completed;
        store.insert_run(&done).await.unwrap();

        let runs = store.list_runs(true).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, active.run_id);

        active.status = RunStatus::Failed;
        store.update_run(&active).await.unwrap();
        assert!(store.list_runs(true).await.unwrap().is_empty());
        assert_eq!(store.list_runs(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_task_round_trip() {
        let store = make_store().await;
        let run = make_run();
        store.insert_run(&run).await.unwrap();

        let mut task = AgentTask::new(run.run_id, Phase::MarketIntelligence, "niche_research", json!({"q": 1}));
        store.insert_task(&task).await.unwrap();

        task.transition_to(TaskState::Validating).unwrap();
        task.output = Some(json!({"found": 3}));
        store.update_task(&task).await.unwrap();

        let tasks = store
            .list_tasks_by_run_and_phase(run.run_id, Phase::MarketIntelligence)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, TaskState::Validating);
        assert_eq!(tasks[0].output, Some(json!({"found": 3})));
    }

    #[tokio::test]
    async fn test_invocation_cache_and_idempotency() {
        let store = make_store().await;
        let run_id = Uuid::new_v4();
        let params = json!({"q": "saas"});
        let key = InvocationKey::new(run_id, "serp", "web_search", &params);

        let invocation = ToolInvocation {
            invocation_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            run_id,
            tool_id: "serp".to_string(),
            op: "web_search".to_string(),
            params_hash: key.params_hash.clone(),
            tier: ToolTier::Free,
            result: Some(json!(["a", "b"])),
            cost_usd: 0.0,
            latency_ms: 12,
            outcome: InvocationOutcome::Success,
            error: None,
            created_at: Utc::now(),
        };
        store.record_invocation(&invocation).await.unwrap();
        // Idempotent replay of the same invocation id.
        store.record_invocation(&invocation).await.unwrap();

        let cached = store.get_cached_invocation(&key).await.unwrap().unwrap();
        assert_eq!(cached.result, Some(json!(["a", "b"])));

        let listed = store.list_invocations_by_task(invocation.task_id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_versions() {
        let store = make_store().await;
        let task_id = Uuid::new_v4();

        for version in 1..=3u64 {
            store
                .put_checkpoint(&Checkpoint::from_state(task_id, version, &json!({"v": version})).unwrap())
                .await
                .unwrap();
        }

        let latest = store.latest_checkpoint(task_id).await.unwrap().unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.state().unwrap(), json!({"v": 3}));

        // Re-put of an existing version is idempotent.
        store
            .put_checkpoint(&Checkpoint::from_state(task_id, 2, &json!({"v": 2})).unwrap())
            .await
            .unwrap();
        assert_eq!(store.latest_checkpoint(task_id).await.unwrap().unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_gate_round_trip() {
        let store = make_store().await;
        let run = make_run();
        store.insert_run(&run).await.unwrap();

        let mut gate = HumanGate::new(
            run.run_id,
            Phase::MarketIntelligence,
            json!({"personas": 2}),
            Utc::now() + chrono::Duration::hours(1),
        );
        store.insert_gate(&gate).await.unwrap();

        gate.resolve(crate::domain::models::GateDecision::Approved, "ops", Some("ok".into()));
        store.update_gate(&gate).await.unwrap();

        let loaded = store.get_gate(gate.gate_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, GateStatus::Approved);
        assert_eq!(loaded.approver_id.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_ledger_totals() {
        let store = make_store().await;
        let run_id = Uuid::new_v4();

        store.append_budget(run_id, "serp", Phase::MarketIntelligence, 0.5).await.unwrap();
        store.append_budget(run_id, "hunter", Phase::LeadAcquisition, 0.75).await.unwrap();

        let totals = store.budget_totals(run_id).await.unwrap();
        assert!((totals.run_total_usd - 1.25).abs() < 1e-9);
        assert!((totals.tool_total("hunter") - 0.75).abs() < 1e-9);
        assert!((totals.phase_total(Phase::MarketIntelligence) - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshots_round_trip() {
        let store = make_store().await;
        store
            .save_breaker_snapshots(&[BreakerSnapshot {
                tool_id: "serp".to_string(),
                state: "open".to_string(),
                failure_count: 4,
                success_count: 0,
                opened_at: Some(Utc::now()),
            }])
            .await
            .unwrap();
        store
            .save_limiter_snapshots(&[LimiterSnapshot {
                tool_id: "serp".to_string(),
                tokens: 2.5,
            }])
            .await
            .unwrap();

        let breakers = store.load_breaker_snapshots().await.unwrap();
        assert_eq!(breakers.len(), 1);
        assert_eq!(breakers[0].state, "open");

        let limiters = store.load_limiter_snapshots().await.unwrap();
        assert!((limiters[0].tokens - 2.5).abs() < f64::EPSILON);
    }
}
