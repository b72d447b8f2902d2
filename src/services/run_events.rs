//! Run event stream.
//!
//! The engine publishes lifecycle events on a broadcast channel so the CLI
//! and tests can observe progress without polling the store. Lagging
//! subscribers drop old events; the durable record stays in the store.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{GateStatus, Phase, RunStatus, TaskState};

/// A lifecycle event emitted by the workflow engine.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
    },
    PhaseStarted {
        run_id: Uuid,
        phase: Phase,
    },
    AgentStateChanged {
        run_id: Uuid,
        task_id: Uuid,
        agent_name: String,
        state: TaskState,
    },
    GateCreated {
        run_id: Uuid,
        gate_id: Uuid,
        phase: Phase,
    },
    GateResolved {
        run_id: Uuid,
        gate_id: Uuid,
        status: GateStatus,
    },
    CompensationStarted {
        run_id: Uuid,
        phase: Phase,
    },
    CompensationFinished {
        run_id: Uuid,
        phase: Phase,
        compensated_agents: usize,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id }
            | Self::PhaseStarted { run_id, .. }
            | Self::AgentStateChanged { run_id, .. }
            | Self::GateCreated { run_id, .. }
            | Self::GateResolved { run_id, .. }
            | Self::CompensationStarted { run_id, .. }
            | Self::CompensationFinished { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }
}

/// Timestamped envelope delivered to subscribers.
#[derive(Debug, Clone)]
pub struct RunEventEnvelope {
    pub event: RunEvent,
    pub at: DateTime<Utc>,
}

/// Broadcast bus for run events.
pub struct RunEventBus {
    sender: broadcast::Sender<RunEventEnvelope>,
}

impl Default for RunEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RunEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish an event; delivery is best-effort (no subscribers is fine).
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(RunEventEnvelope {
            event,
            at: Utc::now(),
        });
    }
}
