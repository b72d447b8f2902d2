//! Ports: interfaces the orchestrator core depends on.

pub mod agent_logic;
pub mod notifier;
pub mod state_store;
pub mod tool_adapter;

pub use agent_logic::{
    AgentLogic, StepContext, StepOutcome, ToolCallResult, ToolFailure, ToolRequest, WaitPolicy,
};
pub use notifier::{LogNotifier, Notification, NotificationChannel, Severity};
pub use state_store::{BreakerSnapshot, BudgetTotals, LimiterSnapshot, StateStore};
pub use tool_adapter::{ToolAdapter, ToolError, ToolOutput};
