//! Agent runtime: drives one agent task through its state machine.
//!
//! The runtime re-enters [`AgentLogic::step`] on each resumption, mediates
//! tool access through the router, checkpoints durable state, and owns the
//! retry/abort decision for every classified failure. Tool requests inside
//! one step dispatch concurrently; results are presented back to the agent
//! in request-index order regardless of completion order.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{DomainResult, ErrorClass, OrchestratorError};
use crate::domain::models::{AgentTask, Checkpoint, TaskState};
use crate::domain::ports::{
    AgentLogic, StateStore, StepContext, StepOutcome, ToolCallResult, ToolFailure, ToolRequest,
    WaitPolicy,
};
use crate::services::retry::RetryPolicy;
use crate::services::run_events::{RunEvent, RunEventBus};
use crate::services::scheduler::{JobKind, Scheduler};
use crate::services::tool_router::{ToolCallContext, ToolRouter};

/// Terminal outcome of one task execution.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed { output: serde_json::Value },
    Failed { reason: String, class: ErrorClass },
    Cancelled,
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

enum DispatchResult {
    Resolved(Vec<ToolCallResult>),
    Cancelled,
}

/// Drives agent tasks against the router and state store.
pub struct AgentRuntime {
    store: Arc<dyn StateStore>,
    router: Arc<ToolRouter>,
    scheduler: Arc<Scheduler>,
    events: Arc<RunEventBus>,
    retry_policy: RetryPolicy,
    cancel_grace: Duration,
    rate_limit_defer: Duration,
}

impl AgentRuntime {
    pub fn new(
        store: Arc<dyn StateStore>,
        router: Arc<ToolRouter>,
        scheduler: Arc<Scheduler>,
        events: Arc<RunEventBus>,
        retry_policy: RetryPolicy,
        cancel_grace: Duration,
        rate_limit_defer: Duration,
    ) -> Self {
        Self {
            store,
            router,
            scheduler,
            events,
            retry_policy,
            cancel_grace,
            rate_limit_defer,
        }
    }

    /// Execute a task to a terminal state, persisting every transition.
    ///
    /// A resumed task (checkpoint_version > 0) re-enters the step loop from
    /// its latest checkpoint; cached tool invocations make the replay
    /// observationally equal to an uninterrupted execution.
    pub async fn run_task(
        &self,
        mut task: AgentTask,
        logic: Arc<dyn AgentLogic>,
        cancel: CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        // new -> validating
        self.transition(&mut task, TaskState::Validating).await?;
        if let Err(reason) = logic.validate_input(&task.input) {
            task.last_error = Some(reason.clone());
            self.transition(&mut task, TaskState::Failed).await?;
            return Ok(TaskOutcome::Failed {
                reason,
                class: ErrorClass::Input,
            });
        }
        self.transition(&mut task, TaskState::Ready).await?;

        if cancel.is_cancelled() {
            self.transition(&mut task, TaskState::Cancelled).await?;
            return Ok(TaskOutcome::Cancelled);
        }
        self.transition(&mut task, TaskState::Running).await?;

        // Resume from the latest checkpoint when one exists.
        let mut state = match self.store.latest_checkpoint(task.task_id).await? {
            Some(checkpoint) => checkpoint.state()?,
            None => task.input.clone(),
        };
        let mut pending_results: Vec<ToolCallResult> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                self.transition(&mut task, TaskState::Cancelled).await?;
                return Ok(TaskOutcome::Cancelled);
            }

            let ctx = self.step_context(&task, &cancel);
            let outcome = match logic.step(&ctx, &state, &pending_results).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if err.is_transient() {
                        match self.enter_retry(&mut task, &cancel, err.to_string()).await? {
                            RetryVerdict::Resume => {
                                state = self.reload_state(&task).await?;
                                pending_results.clear();
                                continue;
                            }
                            RetryVerdict::Exhausted => {
                                return Ok(TaskOutcome::Failed {
                                    reason: err.to_string(),
                                    class: ErrorClass::Transient,
                                });
                            }
                            RetryVerdict::Cancelled => return Ok(TaskOutcome::Cancelled),
                        }
                    }
                    task.last_error = Some(err.to_string());
                    self.transition(&mut task, TaskState::Failed).await?;
                    return Ok(TaskOutcome::Failed {
                        reason: err.to_string(),
                        class: err.class(),
                    });
                }
            };
            pending_results.clear();

            match outcome {
                StepOutcome::Done { output } => {
                    task.output = Some(output.clone());
                    self.transition(&mut task, TaskState::Completed).await?;
                    return Ok(TaskOutcome::Completed { output });
                }
                StepOutcome::Abort { reason } => {
                    task.last_error = Some(reason.clone());
                    self.transition(&mut task, TaskState::Failed).await?;
                    return Ok(TaskOutcome::Failed {
                        reason,
                        class: ErrorClass::Permanent,
                    });
                }
                StepOutcome::CheckpointAndContinue { state: next_state } => {
                    self.write_checkpoint(&mut task, &next_state).await?;
                    self.transition(&mut task, TaskState::Checkpointed).await?;
                    self.transition(&mut task, TaskState::Running).await?;
                    state = next_state;
                }
                StepOutcome::NeedsTools { requests, wait } => {
                    if requests.is_empty() {
                        task.last_error = Some("step requested zero tools".to_string());
                        self.transition(&mut task, TaskState::Failed).await?;
                        return Ok(TaskOutcome::Failed {
                            reason: "step requested zero tools".to_string(),
                            class: ErrorClass::Internal,
                        });
                    }
                    self.transition(&mut task, TaskState::Suspended).await?;

                    // Deferral loop: rate-limited / circuit-open rounds
                    // re-dispatch without consuming an attempt.
                    let results = loop {
                        match self.dispatch_requests(&task, &requests, wait, &cancel).await? {
                            DispatchResult::Cancelled => {
                                self.transition(&mut task, TaskState::Cancelled).await?;
                                return Ok(TaskOutcome::Cancelled);
                            }
                            DispatchResult::Resolved(results) => {
                                match classify_round(&results) {
                                    RoundVerdict::Usable => break results,
                                    RoundVerdict::Defer { retry_after } => {
                                        let delay = self
                                            .retry_policy
                                            .rate_limit_delay(retry_after, self.rate_limit_defer);
                                        tracing::debug!(
                                            task_id = %task.task_id,
                                            delay_ms = delay.as_millis() as u64,
                                            "deferring rate-limited tool round"
                                        );
                                        tokio::select! {
                                            () = cancel.cancelled() => {
                                                self.transition(&mut task, TaskState::Cancelled).await?;
                                                return Ok(TaskOutcome::Cancelled);
                                            }
                                            () = tokio::time::sleep(delay) => {}
                                        }
                                    }
                                    RoundVerdict::Retry { reason } => {
                                        match self.enter_retry(&mut task, &cancel, reason.clone()).await? {
                                            RetryVerdict::Resume => {
                                                state = self.reload_state(&task).await?;
                                                pending_results.clear();
                                                break Vec::new();
                                            }
                                            RetryVerdict::Exhausted => {
                                                return Ok(TaskOutcome::Failed {
                                                    reason,
                                                    class: ErrorClass::Transient,
                                                });
                                            }
                                            RetryVerdict::Cancelled => return Ok(TaskOutcome::Cancelled),
                                        }
                                    }
                                    RoundVerdict::Fail { reason, class } => {
                                        task.last_error = Some(reason.clone());
                                        self.transition(&mut task, TaskState::Failed).await?;
                                        return Ok(TaskOutcome::Failed { reason, class });
                                    }
                                }
                            }
                        }
                    };

                    if results.is_empty() {
                        // Retry path re-entered from checkpoint.
                        continue;
                    }

                    // Checkpoint after a successful tool round so resume
                    // replays from here with cached results.
                    self.write_checkpoint(&mut task, &state).await?;
                    self.transition(&mut task, TaskState::Running).await?;
                    pending_results = results;
                }
            }
        }
    }

    /// Run an agent's compensation hook, retrying up to `max_attempts`.
    pub async fn compensate_task(
        &self,
        task: &AgentTask,
        logic: Arc<dyn AgentLogic>,
        max_attempts: u32,
    ) -> DomainResult<()> {
        let output = task.output.clone().unwrap_or(serde_json::Value::Null);
        let ctx = self.step_context(task, &CancellationToken::new());

        let mut last_err: Option<OrchestratorError> = None;
        for attempt in 1..=max_attempts.max(1) {
            match logic.compensate(&ctx, &output).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        task_id = %task.task_id,
                        agent = %task.agent_name,
                        attempt,
                        error = %err,
                        "compensation attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| OrchestratorError::Internal("compensation failed".to_string())))
    }

    fn step_context(&self, task: &AgentTask, cancel: &CancellationToken) -> StepContext {
        StepContext {
            run_id: task.run_id,
            task_id: task.task_id,
            phase: task.phase,
            agent_name: task.agent_name.clone(),
            attempt: task.attempt,
            cancel: cancel.clone(),
        }
    }

    async fn transition(&self, task: &mut AgentTask, next: TaskState) -> DomainResult<()> {
        task.transition_to(next)
            .map_err(|(from, to)| OrchestratorError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })?;
        self.store.update_task(task).await?;
        self.events.publish(RunEvent::AgentStateChanged {
            run_id: task.run_id,
            task_id: task.task_id,
            agent_name: task.agent_name.clone(),
            state: next,
        });
        Ok(())
    }

    async fn write_checkpoint(&self, task: &mut AgentTask, state: &serde_json::Value) -> DomainResult<()> {
        let version = task.checkpoint_version + 1;
        let checkpoint = Checkpoint::from_state(task.task_id, version, state)?;
        self.store.put_checkpoint(&checkpoint).await?;
        task.checkpoint_version = version;
        self.store.update_task(task).await?;
        Ok(())
    }

    async fn reload_state(&self, task: &AgentTask) -> DomainResult<serde_json::Value> {
        match self.store.latest_checkpoint(task.task_id).await? {
            Some(checkpoint) => Ok(checkpoint.state()?),
            None => Ok(task.input.clone()),
        }
    }

    /// Arm the backoff timer and re-enter running, or exhaust.
    async fn enter_retry(
        &self,
        task: &mut AgentTask,
        cancel: &CancellationToken,
        reason: String,
    ) -> DomainResult<RetryVerdict> {
        if !self.retry_policy.allows_retry(task.attempt) {
            task.last_error = Some(reason);
            self.transition(task, TaskState::Retrying).await.ok();
            self.transition(task, TaskState::Failed).await?;
            return Ok(RetryVerdict::Exhausted);
        }

        task.last_error = Some(reason);
        self.transition(task, TaskState::Retrying).await?;
        let delay = self.retry_policy.delay_for(task.attempt);
        task.attempt += 1;
        self.store.update_task(task).await?;

        tokio::select! {
            () = cancel.cancelled() => {
                self.transition(task, TaskState::Cancelled).await?;
                Ok(RetryVerdict::Cancelled)
            }
            () = tokio::time::sleep(delay) => {
                self.transition(task, TaskState::Running).await?;
                Ok(RetryVerdict::Resume)
            }
        }
    }

    /// Dispatch a step's tool requests concurrently and gather results
    /// until the wait policy is satisfied.
    async fn dispatch_requests(
        &self,
        task: &AgentTask,
        requests: &[ToolRequest],
        wait: WaitPolicy,
        cancel: &CancellationToken,
    ) -> DomainResult<DispatchResult> {
        let required = wait.required(requests.len());
        let mut in_flight = FuturesUnordered::new();

        for (index, request) in requests.iter().enumerate() {
            let router = Arc::clone(&self.router);
            let request = request.clone();
            let call_ctx = ToolCallContext {
                run_id: task.run_id,
                task_id: task.task_id,
                phase: task.phase,
                cancel: cancel.child_token(),
            };
            match self.scheduler.submit(JobKind::ToolDispatch, async move {
                let outcome = router.dispatch(&call_ctx, &request).await;
                (index, outcome)
            }) {
                Ok(handle) => in_flight.push(handle),
                Err(err) => {
                    // Backpressure rejection resolves the request as a
                    // transient failure instead of stalling the step.
                    in_flight.push(tokio::spawn({
                        let message = err.to_string();
                        async move {
                            (
                                index,
                                crate::services::tool_router::RouteOutcome {
                                    result: Err(ToolFailure::new(ErrorClass::Transient, message)),
                                    source_errors: Default::default(),
                                },
                            )
                        }
                    }));
                }
            }
        }

        let mut resolved: Vec<ToolCallResult> = Vec::new();
        while resolved.len() < required {
            tokio::select! {
                () = cancel.cancelled() => {
                    // Grace window for in-flight invocations, then abandon.
                    let drain = async {
                        while let Some(joined) = in_flight.next().await {
                            if let Ok((index, outcome)) = joined {
                                resolved.push(ToolCallResult {
                                    request_index: index,
                                    result: outcome.result,
                                });
                            }
                        }
                    };
                    let _ = tokio::time::timeout(self.cancel_grace, drain).await;
                    return Ok(DispatchResult::Cancelled);
                }
                joined = in_flight.next() => {
                    match joined {
                        Some(Ok((index, outcome))) => {
                            resolved.push(ToolCallResult {
                                request_index: index,
                                result: outcome.result,
                            });
                        }
                        Some(Err(join_err)) => {
                            resolved.push(ToolCallResult {
                                request_index: usize::MAX,
                                result: Err(ToolFailure::new(
                                    ErrorClass::Transient,
                                    format!("tool dispatch panicked: {join_err}"),
                                )),
                            });
                        }
                        None => break,
                    }
                }
            }
        }

        // Unresolved handles are dropped here: the underlying jobs keep
        // running and their completions land in the invocation cache
        // without affecting this task's state.
        drop(in_flight);

        resolved.sort_by_key(|r| r.request_index);
        Ok(DispatchResult::Resolved(resolved))
    }
}

enum RetryVerdict {
    Resume,
    Exhausted,
    Cancelled,
}

enum RoundVerdict {
    /// At least one success: present results to the agent.
    Usable,
    /// Everything failed softly (rate limit / circuit open): defer and
    /// re-dispatch without consuming an attempt.
    Defer { retry_after: Option<Duration> },
    /// Everything failed transiently: consume an attempt and retry from
    /// the last checkpoint.
    Retry { reason: String },
    /// Unrecoverable for this agent.
    Fail { reason: String, class: ErrorClass },
}

/// Decide the step-level response to one resolved tool round.
fn classify_round(results: &[ToolCallResult]) -> RoundVerdict {
    if results.iter().any(ToolCallResult::is_success) {
        return RoundVerdict::Usable;
    }

    let failures: Vec<&ToolFailure> = results
        .iter()
        .filter_map(|r| r.result.as_ref().err())
        .collect();
    if failures.is_empty() {
        return RoundVerdict::Usable;
    }

    if let Some(denied) = failures.iter().find(|f| f.class == ErrorClass::BudgetDenied) {
        return RoundVerdict::Fail {
            reason: denied.message.clone(),
            class: ErrorClass::BudgetDenied,
        };
    }

    let all_soft = failures
        .iter()
        .all(|f| matches!(f.class, ErrorClass::RateLimited | ErrorClass::CircuitOpen));
    if all_soft {
        let retry_after = failures
            .iter()
            .filter_map(|f| f.retry_after_ms)
            .max()
            .map(Duration::from_millis);
        return RoundVerdict::Defer { retry_after };
    }

    if failures.iter().any(|f| f.class == ErrorClass::Transient) {
        let reason = failures
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return RoundVerdict::Retry { reason };
    }

    let reason = failures
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    RoundVerdict::Fail {
        reason,
        class: ErrorClass::Permanent,
    }
}
