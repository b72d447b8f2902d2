//! Human approval gates between pipeline phases.
//!
//! A gate is created when a gated phase completes; the engine then parks on
//! [`GateService::await_decision`] until an approver responds, the
//! auto-approve predicate fires, or the deadline passes. Expiry is treated
//! by the engine as rejection.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainResult, OrchestratorError};
use crate::domain::models::{GateDecision, GateStatus, GatesConfig, HumanGate, Phase, SYSTEM_APPROVER};
use crate::domain::ports::{Notification, NotificationChannel, Severity, StateStore};
use crate::services::run_events::{RunEvent, RunEventBus};

/// Creates, resolves, and awaits human gates.
pub struct GateService {
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn NotificationChannel>,
    events: Arc<RunEventBus>,
    config: GatesConfig,
}

impl GateService {
    pub fn new(
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn NotificationChannel>,
        events: Arc<RunEventBus>,
        config: GatesConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            events,
            config,
        }
    }

    /// Create a gate for a completed phase and notify the approver.
    ///
    /// When the phase's auto-approve predicate accepts the artifact, the
    /// gate is persisted already approved with `approver_id = "system"`.
    pub async fn create_gate(
        &self,
        run_id: Uuid,
        phase: Phase,
        artifact: serde_json::Value,
        notification_target: Option<&str>,
    ) -> DomainResult<HumanGate> {
        let deadline = Utc::now() + Duration::seconds(self.config.deadline_secs as i64);
        let mut gate = HumanGate::new(run_id, phase, artifact, deadline);

        if self.auto_approves(&gate) {
            gate.resolve(GateDecision::Approved, SYSTEM_APPROVER, Some("auto-approved".to_string()));
            self.store.insert_gate(&gate).await?;
            self.events.publish(RunEvent::GateResolved {
                run_id,
                gate_id: gate.gate_id,
                status: GateStatus::Approved,
            });
            tracing::info!(gate_id = %gate.gate_id, phase = %phase, "gate auto-approved");
            return Ok(gate);
        }

        self.store.insert_gate(&gate).await?;
        self.events.publish(RunEvent::GateCreated {
            run_id,
            gate_id: gate.gate_id,
            phase,
        });
        self.notifier
            .send(
                notification_target,
                &Notification::new(
                    Severity::Info,
                    "approval required",
                    format!("run {run_id} finished phase {phase} and awaits approval"),
                )
                .with_link(format!("cadence://gates/{}", gate.gate_id)),
            )
            .await;
        Ok(gate)
    }

    /// Non-blocking status read, lazily expiring overdue gates.
    pub async fn poll(&self, gate_id: Uuid) -> DomainResult<GateStatus> {
        let gate = self
            .store
            .get_gate(gate_id)
            .await?
            .ok_or(OrchestratorError::GateNotFound(gate_id))?;
        if gate.is_expired(Utc::now()) {
            return Ok(self.expire(gate).await?);
        }
        Ok(gate.status)
    }

    /// Submit a decision against a pending gate.
    ///
    /// Idempotent: re-submitting the decision a terminal gate already has
    /// is a no-op; a conflicting decision raises `GateAlreadyDecided`;
    /// decisions against an expired gate raise `GateNotPending`.
    pub async fn submit_decision(
        &self,
        gate_id: Uuid,
        decision: GateDecision,
        approver_id: &str,
        notes: Option<String>,
    ) -> DomainResult<GateStatus> {
        let mut gate = self
            .store
            .get_gate(gate_id)
            .await?
            .ok_or(OrchestratorError::GateNotFound(gate_id))?;

        if gate.is_expired(Utc::now()) {
            self.expire(gate).await?;
            return Err(OrchestratorError::GateNotPending(gate_id));
        }

        match gate.status {
            GateStatus::Pending => {
                gate.resolve(decision, approver_id, notes);
                self.store.update_gate(&gate).await?;
                self.events.publish(RunEvent::GateResolved {
                    run_id: gate.run_id,
                    gate_id,
                    status: gate.status,
                });
                tracing::info!(gate_id = %gate_id, status = %gate.status, approver = approver_id, "gate decided");
                Ok(gate.status)
            }
            GateStatus::Expired => Err(OrchestratorError::GateNotPending(gate_id)),
            current if current == decision.to_status() => Ok(current),
            _ => Err(OrchestratorError::GateAlreadyDecided(gate_id)),
        }
    }

    /// Suspend until the gate reaches a terminal status, the deadline
    /// passes (returns `Expired`), or `cancel` fires.
    pub async fn await_decision(
        &self,
        gate_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<GateStatus> {
        let interval = std::time::Duration::from_millis(self.config.poll_interval_ms.max(10));
        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            let status = self.poll(gate_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn auto_approves(&self, gate: &HumanGate) -> bool {
        let Some(auto) = self.config.auto_approve.get(gate.phase.as_str()) else {
            return false;
        };
        if !auto.enabled {
            return false;
        }
        gate.artifact
            .get("quality_score")
            .and_then(serde_json::Value::as_f64)
            .is_some_and(|score| score >= auto.min_quality_score)
    }

    async fn expire(&self, mut gate: HumanGate) -> DomainResult<GateStatus> {
        gate.status = GateStatus::Expired;
        gate.decided_at = Some(Utc::now());
        self.store.update_gate(&gate).await?;
        self.events.publish(RunEvent::GateResolved {
            run_id: gate.run_id,
            gate_id: gate.gate_id,
            status: GateStatus::Expired,
        });
        tracing::warn!(gate_id = %gate.gate_id, "gate expired without a decision");
        Ok(GateStatus::Expired)
    }
}
