//! Workflow engine: drives a run through the five pipeline phases.
//!
//! The engine owns run lifecycle and the saga rule: retry happens inside
//! agents (runtime), compensation happens across agents (engine). On an
//! unrecoverable failure in phase N it invokes compensation hooks for the
//! phase's completed agents in reverse completion order, then fails the
//! run. Human gates park the run between phases until approved.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainResult, ErrorClass, OrchestratorError};
use crate::domain::models::{
    AgentTask, GateDecision, GateStatus, HumanGate, Phase, PhaseSpec, PipelineDefinition,
    RunConfig, RunStatus, TaskState, WorkflowRun,
};
use crate::domain::ports::{AgentLogic, Notification, NotificationChannel, Severity, StateStore};
use crate::services::agent_runtime::{AgentRuntime, TaskOutcome};
use crate::services::budget_governor::BudgetGovernor;
use crate::services::gate_service::GateService;
use crate::services::run_events::{RunEvent, RunEventBus, RunEventEnvelope};
use crate::services::scheduler::{JobKind, Scheduler};
use crate::services::tool_router::ToolRouter;

/// Agent implementations keyed by pipeline agent name.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentLogic>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, logic: Arc<dyn AgentLogic>) {
        self.agents.insert(logic.name().to_string(), logic);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentLogic>> {
        self.agents.get(name).cloned()
    }
}

/// Point-in-time run report for the control plane.
#[derive(Debug, Clone)]
pub struct RunStatusReport {
    pub run: WorkflowRun,
    pub tasks: Vec<AgentTask>,
    pub pending_gates: Vec<HumanGate>,
    pub spend_usd: f64,
}

enum PhaseOutcome {
    Completed {
        outputs: serde_json::Map<String, serde_json::Value>,
    },
    Failed {
        reason: String,
    },
    Cancelled,
}

enum GatePassage {
    Approved,
    Terminal(RunStatus),
}

enum RerunOutcome {
    Completed,
    Failed { reason: String },
    Cancelled,
}

/// The orchestrator's top-level engine.
pub struct WorkflowEngine {
    store: Arc<dyn StateStore>,
    runtime: Arc<AgentRuntime>,
    gates: Arc<GateService>,
    scheduler: Arc<Scheduler>,
    governor: Arc<BudgetGovernor>,
    router: Arc<ToolRouter>,
    notifier: Arc<dyn NotificationChannel>,
    events: Arc<RunEventBus>,
    registry: Arc<AgentRegistry>,
    pipeline: PipelineDefinition,
    max_compensation_attempts: u32,
    cancels: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StateStore>,
        runtime: Arc<AgentRuntime>,
        gates: Arc<GateService>,
        scheduler: Arc<Scheduler>,
        governor: Arc<BudgetGovernor>,
        router: Arc<ToolRouter>,
        notifier: Arc<dyn NotificationChannel>,
        events: Arc<RunEventBus>,
        registry: Arc<AgentRegistry>,
        pipeline: PipelineDefinition,
        max_compensation_attempts: u32,
    ) -> Self {
        Self {
            store,
            runtime,
            gates,
            scheduler,
            governor,
            router,
            notifier,
            events,
            registry,
            pipeline,
            max_compensation_attempts,
            cancels: RwLock::new(HashMap::new()),
        }
    }

    /// Validate a run config and persist a new pending run.
    pub async fn start_run(&self, config: RunConfig) -> DomainResult<Uuid> {
        config.validate().map_err(OrchestratorError::Input)?;
        self.pipeline.validate().map_err(OrchestratorError::Internal)?;
        for name in self.pipeline.agent_names() {
            if self.registry.get(name).is_none() {
                return Err(OrchestratorError::AgentNotRegistered(name.to_string()));
            }
        }

        let run = WorkflowRun::new(config);
        let run_id = run.run_id;
        self.store.insert_run(&run).await?;
        tracing::info!(run_id = %run_id, campaign = %run.config.campaign_name, "run created");
        Ok(run_id)
    }

    /// Read the current status, per-agent states, spend, and pending gates.
    pub async fn get_status(&self, run_id: Uuid) -> DomainResult<RunStatusReport> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(OrchestratorError::RunNotFound(run_id))?;
        let tasks = self.store.list_tasks_by_run(run_id).await?;
        let pending_gates = self
            .store
            .list_gates_by_run(run_id)
            .await?
            .into_iter()
            .filter(|g| g.status == GateStatus::Pending)
            .collect();
        let spend_usd = self.store.budget_totals(run_id).await?.run_total_usd;
        Ok(RunStatusReport {
            run,
            tasks,
            pending_gates,
            spend_usd,
        })
    }

    /// Resolve a pending gate on behalf of an approver.
    pub async fn submit_gate_decision(
        &self,
        gate_id: Uuid,
        decision: GateDecision,
        approver_id: &str,
        notes: Option<String>,
    ) -> DomainResult<GateStatus> {
        self.gates.submit_decision(gate_id, decision, approver_id, notes).await
    }

    /// Request cooperative cancellation of a run.
    pub async fn cancel_run(&self, run_id: Uuid) -> DomainResult<()> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(OrchestratorError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Ok(());
        }

        let driving = {
            let cancels = self.cancels.read().await;
            cancels.get(&run_id).cloned()
        };
        match driving {
            Some(token) => {
                // The drive loop observes the token and walks the run
                // through compensating to cancelled as needed.
                token.cancel();
            }
            None => {
                // Not being driven: no side effects in flight.
                let mut run = run;
                run.status = RunStatus::Cancelled;
                run.completed_at = Some(chrono::Utc::now());
                self.store.update_run(&run).await?;
                self.events.publish(RunEvent::RunFinished {
                    run_id,
                    status: RunStatus::Cancelled,
                });
            }
        }
        Ok(())
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEventEnvelope> {
        self.events.subscribe()
    }

    /// Drive a run until it reaches a terminal status.
    pub async fn run_to_completion(&self, run_id: Uuid) -> DomainResult<RunStatus> {
        let mut run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(OrchestratorError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Ok(run.status);
        }

        let cancel = CancellationToken::new();
        {
            let mut cancels = self.cancels.write().await;
            cancels.insert(run_id, cancel.clone());
        }
        self.governor
            .register_run(run_id, run.budget_cap_usd, run.config.notification_target.clone())
            .await?;

        run.status = RunStatus::Running;
        self.store.update_run(&run).await?;
        self.events.publish(RunEvent::RunStarted { run_id });

        let status = match self.drive(&mut run, &cancel).await {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "run failed with internal error");
                run.last_error = Some(err.to_string());
                self.finish(&mut run, RunStatus::Failed).await?;
                RunStatus::Failed
            }
        };

        {
            let mut cancels = self.cancels.write().await;
            cancels.remove(&run_id);
        }
        self.governor.release_run(run_id).await;
        self.router.purge_run(run_id).await;
        Ok(status)
    }

    /// Drive every non-terminal run in the store; used by the serve loop.
    pub async fn resume_active_runs(&self) -> DomainResult<Vec<(Uuid, RunStatus)>> {
        let runs = self.store.list_runs(true).await?;
        let mut results = Vec::with_capacity(runs.len());
        for run in runs {
            let status = self.run_to_completion(run.run_id).await?;
            results.push((run.run_id, status));
        }
        Ok(results)
    }

    // -------------------------------------------------------------------
    // Internal drive loop
    // -------------------------------------------------------------------

    async fn drive(&self, run: &mut WorkflowRun, cancel: &CancellationToken) -> DomainResult<RunStatus> {
        let phases: Vec<PhaseSpec> = self
            .pipeline
            .phases
            .iter()
            .filter(|p| p.phase >= run.phase)
            .cloned()
            .collect();

        for spec in phases {
            run.phase = spec.phase;
            self.store.update_run(run).await?;
            self.events.publish(RunEvent::PhaseStarted {
                run_id: run.run_id,
                phase: spec.phase,
            });

            let outcome = self.execute_phase(run, &spec, cancel).await?;
            let mut outputs = match outcome {
                PhaseOutcome::Completed { outputs } => outputs,
                PhaseOutcome::Failed { reason } => {
                    self.compensate_phase(run, &spec).await?;
                    run.last_error = Some(reason);
                    self.finish(run, RunStatus::Failed).await?;
                    return Ok(RunStatus::Failed);
                }
                PhaseOutcome::Cancelled => {
                    return self.finish_cancelled(run, &spec).await;
                }
            };

            if spec.gate.is_some() {
                match self.gate_phase(run, &spec, &mut outputs, cancel).await? {
                    GatePassage::Approved => {}
                    GatePassage::Terminal(status) => return Ok(status),
                }
            }

            self.sync_spend(run).await?;
        }

        self.finish(run, RunStatus::Completed).await?;
        Ok(RunStatus::Completed)
    }

    /// Gate loop for a completed phase: create the gate, await a decision,
    /// and handle revision rounds until approval or a terminal decision.
    async fn gate_phase(
        &self,
        run: &mut WorkflowRun,
        spec: &PhaseSpec,
        outputs: &mut serde_json::Map<String, serde_json::Value>,
        cancel: &CancellationToken,
    ) -> DomainResult<GatePassage> {
        loop {
            run.status = RunStatus::AwaitingApproval;
            self.store.update_run(run).await?;

            let artifact = build_gate_artifact(run, spec, outputs);
            let gate = self
                .gates
                .create_gate(
                    run.run_id,
                    spec.phase,
                    artifact,
                    run.config.notification_target.as_deref(),
                )
                .await?;

            let status = if gate.status.is_terminal() {
                gate.status
            } else {
                match self.gates.await_decision(gate.gate_id, cancel).await {
                    Ok(status) => status,
                    Err(OrchestratorError::Cancelled) => {
                        let status = self.finish_cancelled(run, spec).await?;
                        return Ok(GatePassage::Terminal(status));
                    }
                    Err(err) => return Err(err),
                }
            };

            match status {
                GateStatus::Approved => {
                    run.status = RunStatus::Running;
                    self.store.update_run(run).await?;
                    return Ok(GatePassage::Approved);
                }
                GateStatus::RevisionRequested => {
                    run.status = RunStatus::Running;
                    self.store.update_run(run).await?;
                    let notes = self
                        .store
                        .get_gate(gate.gate_id)
                        .await?
                        .and_then(|g| g.notes);
                    match self.rerun_final_agent(run, spec, outputs, notes, cancel).await? {
                        RerunOutcome::Completed => {}
                        RerunOutcome::Failed { reason } => {
                            self.compensate_phase(run, spec).await?;
                            run.last_error = Some(reason);
                            self.finish(run, RunStatus::Failed).await?;
                            return Ok(GatePassage::Terminal(RunStatus::Failed));
                        }
                        RerunOutcome::Cancelled => {
                            let status = self.finish_cancelled(run, spec).await?;
                            return Ok(GatePassage::Terminal(status));
                        }
                    }
                }
                GateStatus::Rejected | GateStatus::Expired => {
                    // The phase itself succeeded; nothing to undo.
                    run.last_error = Some(format!("gate for phase {} was {}", spec.phase, status));
                    self.notifier
                        .send(
                            run.config.notification_target.as_deref(),
                            &Notification::new(
                                Severity::Warning,
                                "run halted at gate",
                                format!("run {} stopped: {}", run.run_id, status),
                            ),
                        )
                        .await;
                    self.finish(run, RunStatus::Failed).await?;
                    return Ok(GatePassage::Terminal(RunStatus::Failed));
                }
                GateStatus::Pending => {
                    return Err(OrchestratorError::Internal(
                        "await_decision returned a pending gate".to_string(),
                    ));
                }
            }
        }
    }

    /// Execute one phase: run its agents respecting intra-phase
    /// dependencies, up to the scheduler's agent concurrency cap.
    async fn execute_phase(
        &self,
        run: &WorkflowRun,
        spec: &PhaseSpec,
        cancel: &CancellationToken,
    ) -> DomainResult<PhaseOutcome> {
        let upstream = self.upstream_outputs(run, spec.phase).await?;

        let mut completed: HashSet<String> = HashSet::new();
        let mut outputs = serde_json::Map::new();
        let mut long_running_failures: Vec<String> = Vec::new();

        // Resume: completed tasks from a prior drive of this phase count;
        // tasks stranded mid-flight by an interrupted process are closed
        // out so their agents can be re-launched.
        for mut task in self.store.list_tasks_by_run_and_phase(run.run_id, spec.phase).await? {
            if task.state == TaskState::Completed {
                completed.insert(task.agent_name.clone());
                if let Some(output) = task.output {
                    outputs.insert(task.agent_name, output);
                }
            } else if !task.state.is_terminal() {
                if task.transition_to(TaskState::Cancelled).is_ok() {
                    self.store.update_task(&task).await?;
                }
            }
        }

        let mut active_names: HashSet<String> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let phase_cancel = cancel.child_token();

        loop {
            // Launch every agent whose dependencies are met.
            for agent_spec in spec.runnable_agents(&completed, &active_names) {
                let logic = self
                    .registry
                    .get(&agent_spec.name)
                    .ok_or_else(|| OrchestratorError::AgentNotRegistered(agent_spec.name.clone()))?;

                let input = build_agent_input(run, &upstream, &outputs, &agent_spec.depends_on);
                let task = AgentTask::new(run.run_id, spec.phase, agent_spec.name.clone(), input);
                self.store.insert_task(&task).await?;

                let runtime = Arc::clone(&self.runtime);
                let agent_cancel = phase_cancel.child_token();
                let name = agent_spec.name.clone();
                let long_running = agent_spec.long_running;
                let handle = self.scheduler.submit(JobKind::AgentRuntime, async move {
                    let outcome = runtime.run_task(task, logic, agent_cancel).await;
                    (name, long_running, outcome)
                })?;
                active_names.insert(agent_spec.name.clone());
                in_flight.push(handle);
            }

            if in_flight.is_empty() {
                break;
            }

            let Some(joined) = in_flight.next().await else {
                break;
            };
            let (name, long_running, outcome) = joined
                .map_err(|e| OrchestratorError::Internal(format!("agent task panicked: {e}")))?;
            active_names.remove(&name);

            match outcome? {
                TaskOutcome::Completed { output } => {
                    completed.insert(name.clone());
                    outputs.insert(name, output);
                }
                TaskOutcome::Failed { reason, class } => {
                    if long_running {
                        // Monitoring/analytics failures alert but never
                        // unwind the campaign.
                        long_running_failures.push(name.clone());
                        completed.insert(name.clone());
                        self.notifier
                            .send(
                                run.config.notification_target.as_deref(),
                                &Notification::new(
                                    Severity::Critical,
                                    "long-running agent failed",
                                    format!("agent {name} in run {} failed: {reason}", run.run_id),
                                ),
                            )
                            .await;
                        continue;
                    }

                    // Stop the phase: cancel siblings and drain them.
                    phase_cancel.cancel();
                    while let Some(joined) = in_flight.next().await {
                        if let Ok((sibling, _, _)) = joined {
                            active_names.remove(&sibling);
                        }
                    }
                    let reason = match class {
                        ErrorClass::BudgetDenied => format!("budget exhausted: {reason}"),
                        _ => reason,
                    };
                    return Ok(PhaseOutcome::Failed { reason });
                }
                TaskOutcome::Cancelled => {
                    while let Some(joined) = in_flight.next().await {
                        if let Ok((sibling, _, _)) = joined {
                            active_names.remove(&sibling);
                        }
                    }
                    return Ok(PhaseOutcome::Cancelled);
                }
            }

            if cancel.is_cancelled() {
                phase_cancel.cancel();
                while in_flight.next().await.is_some() {}
                return Ok(PhaseOutcome::Cancelled);
            }
        }

        let all_agents: HashSet<&str> = spec.agents.iter().map(|a| a.name.as_str()).collect();
        let done: HashSet<&str> = completed.iter().map(String::as_str).collect();
        if done != all_agents {
            let missing: Vec<&&str> = all_agents.difference(&done).collect();
            return Err(OrchestratorError::Internal(format!(
                "phase {} stalled with unrunnable agents: {missing:?}",
                spec.phase
            )));
        }

        if !long_running_failures.is_empty() {
            tracing::warn!(
                run_id = %run.run_id,
                agents = ?long_running_failures,
                "phase completed with failed long-running agents"
            );
        }
        Ok(PhaseOutcome::Completed { outputs })
    }

    /// Re-run the phase's final agent after `revision_requested`.
    async fn rerun_final_agent(
        &self,
        run: &WorkflowRun,
        spec: &PhaseSpec,
        outputs: &mut serde_json::Map<String, serde_json::Value>,
        notes: Option<String>,
        cancel: &CancellationToken,
    ) -> DomainResult<RerunOutcome> {
        let Some(final_agent) = spec.final_agent() else {
            return Ok(RerunOutcome::Completed);
        };
        let logic = self
            .registry
            .get(&final_agent.name)
            .ok_or_else(|| OrchestratorError::AgentNotRegistered(final_agent.name.clone()))?;

        let upstream = self.upstream_outputs(run, spec.phase).await?;
        let mut input = build_agent_input(run, &upstream, outputs, &final_agent.depends_on);
        if let Some(notes) = notes {
            input["revision_notes"] = serde_json::Value::String(notes);
        }

        let task = AgentTask::new(run.run_id, spec.phase, final_agent.name.clone(), input);
        self.store.insert_task(&task).await?;

        let runtime = Arc::clone(&self.runtime);
        let agent_cancel = cancel.child_token();
        let handle = self
            .scheduler
            .submit(JobKind::AgentRuntime, async move {
                runtime.run_task(task, logic, agent_cancel).await
            })?;
        let outcome = handle
            .await
            .map_err(|e| OrchestratorError::Internal(format!("agent task panicked: {e}")))??;

        match outcome {
            TaskOutcome::Completed { output } => {
                outputs.insert(final_agent.name.clone(), output);
                Ok(RerunOutcome::Completed)
            }
            TaskOutcome::Failed { reason, .. } => Ok(RerunOutcome::Failed { reason }),
            TaskOutcome::Cancelled => Ok(RerunOutcome::Cancelled),
        }
    }

    /// Saga compensation for the current phase: each completed agent's
    /// hook runs exactly once, in reverse completion order. Hook failures
    /// raise a critical alert and never cascade.
    async fn compensate_phase(&self, run: &mut WorkflowRun, spec: &PhaseSpec) -> DomainResult<()> {
        run.status = RunStatus::Compensating;
        self.store.update_run(run).await?;
        self.events.publish(RunEvent::CompensationStarted {
            run_id: run.run_id,
            phase: spec.phase,
        });

        // Latest completed task per agent, newest completion first.
        let tasks = self.store.list_tasks_by_run_and_phase(run.run_id, spec.phase).await?;
        let mut latest: HashMap<String, AgentTask> = HashMap::new();
        for task in tasks.into_iter().filter(|t| t.state == TaskState::Completed) {
            let newer = latest
                .get(&task.agent_name)
                .map_or(true, |existing| existing.completed_at < task.completed_at);
            if newer {
                latest.insert(task.agent_name.clone(), task);
            }
        }
        let mut ordered: Vec<AgentTask> = latest.into_values().collect();
        ordered.sort_by_key(|t| std::cmp::Reverse(t.completed_at));

        let mut compensated = 0usize;
        for task in ordered {
            let Some(agent_spec) = spec.agent(&task.agent_name) else {
                continue;
            };
            if !agent_spec.compensable {
                continue;
            }
            let Some(logic) = self.registry.get(&task.agent_name) else {
                continue;
            };
            match self
                .runtime
                .compensate_task(&task, logic, self.max_compensation_attempts)
                .await
            {
                Ok(()) => compensated += 1,
                Err(err) => {
                    self.notifier
                        .send(
                            run.config.notification_target.as_deref(),
                            &Notification::new(
                                Severity::Critical,
                                "compensation failed",
                                format!(
                                    "agent {} in run {} could not be compensated: {err}",
                                    task.agent_name, run.run_id
                                ),
                            ),
                        )
                        .await;
                }
            }
        }

        self.events.publish(RunEvent::CompensationFinished {
            run_id: run.run_id,
            phase: spec.phase,
            compensated_agents: compensated,
        });
        Ok(())
    }

    /// Handle run cancellation observed mid-phase: compensate when the
    /// current phase already committed side effects, then cancel.
    async fn finish_cancelled(&self, run: &mut WorkflowRun, spec: &PhaseSpec) -> DomainResult<RunStatus> {
        let had_side_effects = self
            .store
            .list_tasks_by_run_and_phase(run.run_id, spec.phase)
            .await?
            .iter()
            .any(|t| t.state == TaskState::Completed);
        if had_side_effects {
            self.compensate_phase(run, spec).await?;
        }
        self.finish(run, RunStatus::Cancelled).await?;
        Ok(RunStatus::Cancelled)
    }

    async fn finish(&self, run: &mut WorkflowRun, status: RunStatus) -> DomainResult<()> {
        self.sync_spend(run).await?;
        run.status = status;
        run.completed_at = Some(chrono::Utc::now());
        self.store.update_run(run).await?;
        self.events.publish(RunEvent::RunFinished {
            run_id: run.run_id,
            status,
        });
        tracing::info!(run_id = %run.run_id, status = %status, spend = run.spend_usd, "run finished");
        Ok(())
    }

    async fn sync_spend(&self, run: &mut WorkflowRun) -> DomainResult<()> {
        let totals = self.store.budget_totals(run.run_id).await?;
        run.spend_usd = totals.run_total_usd;
        if run.spend_usd > run.budget_cap_usd {
            tracing::error!(
                run_id = %run.run_id,
                spend = run.spend_usd,
                cap = run.budget_cap_usd,
                "spend exceeded cap"
            );
        }
        self.store.update_run(run).await?;
        Ok(())
    }

    /// Snapshot of the previous phase's committed outputs.
    async fn upstream_outputs(
        &self,
        run: &WorkflowRun,
        phase: Phase,
    ) -> DomainResult<serde_json::Map<String, serde_json::Value>> {
        let mut upstream = serde_json::Map::new();
        let Some(previous) = Phase::ALL.iter().find(|p| p.next() == Some(phase)) else {
            return Ok(upstream);
        };
        for task in self.store.list_tasks_by_run_and_phase(run.run_id, *previous).await? {
            if task.state == TaskState::Completed {
                if let Some(output) = task.output {
                    upstream.insert(task.agent_name, output);
                }
            }
        }
        Ok(upstream)
    }
}

/// Input envelope handed to an agent: the campaign seed, the previous
/// phase's outputs, and the outputs of its intra-phase dependencies.
fn build_agent_input(
    run: &WorkflowRun,
    upstream: &serde_json::Map<String, serde_json::Value>,
    outputs: &serde_json::Map<String, serde_json::Value>,
    depends_on: &[String],
) -> serde_json::Value {
    let mut deps = serde_json::Map::new();
    for dep in depends_on {
        if let Some(output) = outputs.get(dep) {
            deps.insert(dep.clone(), output.clone());
        }
    }
    serde_json::json!({
        "campaign": run.config.input,
        "upstream": upstream,
        "deps": deps,
    })
}

/// Artifact shown to a gate approver: phase outputs plus the final
/// agent's quality score when it reports one.
fn build_gate_artifact(
    run: &WorkflowRun,
    spec: &PhaseSpec,
    outputs: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    let quality_score = spec
        .final_agent()
        .and_then(|a| outputs.get(&a.name))
        .and_then(|o| o.get("quality_score"))
        .cloned();
    let mut artifact = serde_json::json!({
        "campaign": run.config.campaign_name,
        "phase": spec.phase.as_str(),
        "outputs": outputs,
    });
    if let Some(score) = quality_score {
        artifact["quality_score"] = score;
    }
    artifact
}
