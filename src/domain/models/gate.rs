//! Human approval gate domain model.
//!
//! A gate pauses the engine between phases until an external approver
//! responds (or the deadline passes). A phase transition across a gate
//! requires `Approved`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::Phase;

/// Approver id recorded for auto-approved gates.
pub const SYSTEM_APPROVER: &str = "system";

/// Status of a human gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    RevisionRequested,
    Expired,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RevisionRequested => "revision_requested",
            Self::Expired => "expired",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "revision_requested" => Some(Self::RevisionRequested),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decision submitted against a pending gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Approved,
    Rejected,
    RevisionRequested,
}

impl GateDecision {
    pub fn to_status(self) -> GateStatus {
        match self {
            Self::Approved => GateStatus::Approved,
            Self::Rejected => GateStatus::Rejected,
            Self::RevisionRequested => GateStatus::RevisionRequested,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            "revision_requested" | "revise" => Some(Self::RevisionRequested),
            _ => None,
        }
    }
}

/// A rendezvous between phases requiring external approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanGate {
    pub gate_id: Uuid,
    pub run_id: Uuid,
    /// Phase whose output is awaiting approval.
    pub phase: Phase,
    /// Artifact presented to the approver (phase output summary).
    pub artifact: serde_json::Value,
    pub status: GateStatus,
    pub deadline: DateTime<Utc>,
    pub approver_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl HumanGate {
    pub fn new(run_id: Uuid, phase: Phase, artifact: serde_json::Value, deadline: DateTime<Utc>) -> Self {
        Self {
            gate_id: Uuid::new_v4(),
            run_id,
            phase,
            artifact,
            status: GateStatus::Pending,
            deadline,
            approver_id: None,
            notes: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    /// Whether the deadline has passed for a still-pending gate.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == GateStatus::Pending && now >= self.deadline
    }

    /// Resolve the gate with a decision.
    pub fn resolve(&mut self, decision: GateDecision, approver_id: impl Into<String>, notes: Option<String>) {
        self.status = decision.to_status();
        self.approver_id = Some(approver_id.into());
        self.notes = notes;
        self.decided_at = Some(Utc::now());
    }
}
