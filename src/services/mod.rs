//! Orchestration services for the cadence pipeline.

pub mod agent_runtime;
pub mod budget_governor;
pub mod circuit_breaker;
pub mod gate_service;
pub mod rate_limiter;
pub mod retry;
pub mod run_events;
pub mod scheduler;
pub mod single_flight;
pub mod tool_router;
pub mod workflow_engine;

pub use agent_runtime::{AgentRuntime, TaskOutcome};
pub use budget_governor::{Authorization, BudgetGovernor};
pub use circuit_breaker::{
    BreakerCheck, BreakerStats, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
pub use gate_service::GateService;
pub use rate_limiter::{AcquireOutcome, RateLimiterRegistry, TokenBucket};
pub use retry::RetryPolicy;
pub use run_events::{RunEvent, RunEventBus, RunEventEnvelope};
pub use scheduler::{JobKind, Scheduler};
pub use single_flight::{Entry, FlightResult, SingleFlight};
pub use tool_router::{
    OpPolicy, RouteOutcome, SelectionMode, ToolCallContext, ToolRegistry, ToolRouter,
};
pub use workflow_engine::{AgentRegistry, RunStatusReport, WorkflowEngine};
