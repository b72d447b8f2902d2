//! Agent task domain model.
//!
//! An [`AgentTask`] is one execution of one agent within a run. Its state
//! machine is driven by the agent runtime; at most one task per
//! (run, agent, attempt) may be running at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::Phase;

/// Status of an agent task in its lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, not yet validated.
    New,
    /// Input existence and schema being checked.
    Validating,
    /// Inputs available, waiting for a worker.
    Ready,
    /// Step loop executing.
    Running,
    /// One or more tool invocations in flight.
    Suspended,
    /// Durable state flushed.
    Checkpointed,
    /// Transient failure; backoff timer armed.
    Retrying,
    /// Output written.
    Completed,
    /// Non-retryable failure or attempts exhausted.
    Failed,
    /// Cooperative cancellation.
    Cancelled,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::New
    }
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Validating => "validating",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Checkpointed => "checkpointed",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "validating" => Some(Self::Validating),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "suspended" => Some(Self::Suspended),
            "checkpointed" => Some(Self::Checkpointed),
            "retrying" => Some(Self::Retrying),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this state.
    ///
    /// Any non-terminal state may also transition to `Cancelled`.
    pub fn valid_transitions(&self) -> &'static [TaskState] {
        match self {
            Self::New => &[Self::Validating, Self::Cancelled],
            Self::Validating => &[Self::Ready, Self::Failed, Self::Cancelled],
            Self::Ready => &[Self::Running, Self::Cancelled],
            Self::Running => &[
                Self::Suspended,
                Self::Checkpointed,
                Self::Completed,
                Self::Retrying,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Suspended => &[Self::Running, Self::Retrying, Self::Failed, Self::Cancelled],
            Self::Checkpointed => &[Self::Running, Self::Cancelled],
            Self::Retrying => &[Self::Running, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution of one agent within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: Uuid,
    pub run_id: Uuid,
    /// Pipeline agent name (e.g. `"niche_research"`).
    pub agent_name: String,
    /// Phase this task belongs to.
    pub phase: Phase,
    pub state: TaskState,
    /// Execution attempt, starting at 1. Incremented on retry.
    pub attempt: u32,
    /// Snapshot of upstream outputs handed to the agent.
    pub input: serde_json::Value,
    /// Final agent output, set when the task completes.
    pub output: Option<serde_json::Value>,
    /// Version of the latest durable checkpoint, 0 when none.
    pub checkpoint_version: u64,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentTask {
    /// Create a new task for `agent_name` in `phase` of `run_id`.
    pub fn new(run_id: Uuid, phase: Phase, agent_name: impl Into<String>, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            run_id,
            agent_name: agent_name.into(),
            phase,
            state: TaskState::New,
            attempt: 1,
            input,
            output: None,
            checkpoint_version: 0,
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state transition, rejecting invalid ones.
    pub fn transition_to(&mut self, next: TaskState) -> Result<(), (TaskState, TaskState)> {
        if !self.state.can_transition_to(next) {
            return Err((self.state, next));
        }
        if next == TaskState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task() -> AgentTask {
        AgentTask::new(Uuid::new_v4(), Phase::MarketIntelligence, "niche_research", serde_json::Value::Null)
    }

    #[test]
    fn test_initial_state() {
        let task = make_task();
        assert_eq!(task.state, TaskState::New);
        assert_eq!(task.attempt, 1);
        assert_eq!(task.checkpoint_version, 0);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = make_task();
        for next in [
            TaskState::Validating,
            TaskState::Ready,
            TaskState::Running,
            TaskState::Suspended,
            TaskState::Running,
            TaskState::Checkpointed,
            TaskState::Running,
            TaskState::Completed,
        ] {
            task.transition_to(next).unwrap();
        }
        assert!(task.state.is_terminal());
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut task = make_task();
        assert!(task.transition_to(TaskState::Running).is_err());
        assert_eq!(task.state, TaskState::New);
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        for terminal in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert!(terminal.valid_transitions().is_empty());
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn test_retry_path() {
        let mut task = make_task();
        task.transition_to(TaskState::Validating).unwrap();
        task.transition_to(TaskState::Ready).unwrap();
        task.transition_to(TaskState::Running).unwrap();
        task.transition_to(TaskState::Suspended).unwrap();
        task.transition_to(TaskState::Retrying).unwrap();
        task.transition_to(TaskState::Running).unwrap();
        assert_eq!(task.state, TaskState::Running);
    }

    #[test]
    fn test_validating_can_fail() {
        let mut task = make_task();
        task.transition_to(TaskState::Validating).unwrap();
        task.transition_to(TaskState::Failed).unwrap();
        assert!(task.state.is_terminal());
    }

    #[test]
    fn test_state_round_trip() {
        for s in [
            TaskState::New,
            TaskState::Validating,
            TaskState::Ready,
            TaskState::Running,
            TaskState::Suspended,
            TaskState::Checkpointed,
            TaskState::Retrying,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::from_str(s.as_str()), Some(s));
        }
    }
}
