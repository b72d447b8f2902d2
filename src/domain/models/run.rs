//! Workflow run domain model.
//!
//! A [`WorkflowRun`] is one execution of the outreach pipeline, advancing
//! through the five fixed phases. Phase advances monotonically except while
//! the run is compensating.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five fixed pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    MarketIntelligence,
    LeadAcquisition,
    Verification,
    Personalization,
    Execution,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 5] = [
        Self::MarketIntelligence,
        Self::LeadAcquisition,
        Self::Verification,
        Self::Personalization,
        Self::Execution,
    ];

    /// 1-based position in the pipeline.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::MarketIntelligence => 1,
            Self::LeadAcquisition => 2,
            Self::Verification => 3,
            Self::Personalization => 4,
            Self::Execution => 5,
        }
    }

    /// The phase after this one, or `None` at the end of the pipeline.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Self::MarketIntelligence => Some(Self::LeadAcquisition),
            Self::LeadAcquisition => Some(Self::Verification),
            Self::Verification => Some(Self::Personalization),
            Self::Personalization => Some(Self::Execution),
            Self::Execution => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketIntelligence => "market_intelligence",
            Self::LeadAcquisition => "lead_acquisition",
            Self::Verification => "verification",
            Self::Personalization => "personalization",
            Self::Execution => "execution",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "market_intelligence" => Some(Self::MarketIntelligence),
            "lead_acquisition" => Some(Self::LeadAcquisition),
            "verification" => Some(Self::Verification),
            "personalization" => Some(Self::Personalization),
            "execution" => Some(Self::Execution),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet started.
    Pending,
    /// Phases executing.
    Running,
    /// Paused on a human gate.
    AwaitingApproval,
    /// Saga compensation in progress.
    Compensating,
    /// All phases completed.
    Completed,
    /// Unrecoverable failure.
    Failed,
    /// Cancelled by request.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Compensating => "compensating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "compensating" => Some(Self::Compensating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-supplied configuration for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Campaign label, used in notifications and gate artifacts.
    pub campaign_name: String,
    /// Seed input handed to the first phase's agents.
    pub input: serde_json::Value,
    /// Hard budget cap for the run in USD.
    pub budget_cap_usd: f64,
    /// Target for gate and budget notifications (channel-specific).
    #[serde(default)]
    pub notification_target: Option<String>,
}

impl RunConfig {
    /// Validate caller input before a run is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.campaign_name.trim().is_empty() {
            return Err("campaign_name must not be empty".to_string());
        }
        if !self.budget_cap_usd.is_finite() || self.budget_cap_usd <= 0.0 {
            return Err(format!("budget_cap_usd must be positive, got {}", self.budget_cap_usd));
        }
        Ok(())
    }
}

/// One execution of the outreach pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Immutable run identifier.
    pub run_id: Uuid,
    /// Current (or last active) phase.
    pub phase: Phase,
    /// Current status.
    pub status: RunStatus,
    /// Caller configuration.
    pub config: RunConfig,
    /// Budget cap, denormalized from config for observation queries.
    pub budget_cap_usd: f64,
    /// Spend so far. Invariant: `spend_usd <= budget_cap_usd`.
    pub spend_usd: f64,
    /// Most recent error, if any.
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Create a new pending run from a validated config.
    pub fn new(config: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            phase: Phase::MarketIntelligence,
            status: RunStatus::Pending,
            budget_cap_usd: config.budget_cap_usd,
            config,
            spend_usd: 0.0,
            last_error: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Remaining budget headroom in USD.
    pub fn budget_remaining(&self) -> f64 {
        (self.budget_cap_usd - self.spend_usd).max(0.0)
    }
}
