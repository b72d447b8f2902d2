//! Domain models for the cadence orchestrator.

pub mod checkpoint;
pub mod config;
pub mod gate;
pub mod invocation;
pub mod pipeline;
pub mod run;
pub mod task;

pub use checkpoint::Checkpoint;
pub use config::{
    AutoApproveConfig, BreakerConfig, BreakerSection, BudgetConfig, ConcurrencyConfig, Config,
    DatabaseConfig, GatesConfig, LoggingConfig, NotificationConfig, RateConfig, RateSection,
    RetryConfig, RetrySection, RuntimeConfig, SchedulerConfig,
};
pub use gate::{GateDecision, GateStatus, HumanGate, SYSTEM_APPROVER};
pub use invocation::{params_hash, InvocationKey, InvocationOutcome, ToolInvocation, ToolTier};
pub use pipeline::{AgentSpec, GateSpec, PhaseSpec, PipelineDefinition};
pub use run::{Phase, RunConfig, RunStatus, WorkflowRun};
pub use task::{AgentTask, TaskState};
