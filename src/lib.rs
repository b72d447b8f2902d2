//! Cadence - Agentic Workflow Orchestrator
//!
//! Runtime for a five-phase cold-outreach pipeline:
//! - Workflow engine with fixed phase graph, human approval gates, and
//!   saga compensation
//! - Agent runtime with an explicit step/checkpoint loop and cooperative
//!   cancellation
//! - Tool router with tiered waterfall/fanout selection and single-flight
//!   result caching
//! - Circuit breakers, token-bucket rate limits, and jittered retries per
//!   external tool
//! - Budget governor with per-run/phase/tool caps
//! - SQLite state store with durable checkpoints and resume

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DomainResult, ErrorClass, OrchestratorError};
pub use domain::models::{Phase, RunConfig, RunStatus};
pub use infrastructure::setup::{Orchestrator, OrchestratorBuilder};
pub use services::workflow_engine::WorkflowEngine;
