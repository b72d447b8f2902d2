//! Domain layer: models, ports, and errors for the cadence orchestrator.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainResult, ErrorClass, OrchestratorError};
