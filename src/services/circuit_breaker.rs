//! Circuit breaker pattern for failure detection and recovery.
//!
//! One breaker per external tool id. Repeated monitored failures open the
//! circuit and halt calls to that tool; after a timeout a single probe is
//! admitted (half-open), and consecutive probe successes close the circuit
//! again. Breakers are process-wide shared state, snapshotted on shutdown
//! for warm restart.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::models::{BreakerConfig, BreakerSection};
use crate::domain::ports::BreakerSnapshot;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are blocked.
    Open,
    /// Testing recovery; at most one probe in flight.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(Self::Closed),
            "open" => Some(Self::Open),
            "half_open" => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

/// Result of a breaker admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerCheck {
    /// Circuit closed; request admitted.
    Allowed,
    /// Circuit half-open; this caller holds the single probe slot and must
    /// report success or failure to release it.
    Probe,
    /// Circuit open; request rejected.
    Blocked { retry_after: DateTime<Utc> },
}

impl BreakerCheck {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Blocked { .. })
    }
}

/// Individual circuit breaker state for one tool.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub tool_id: String,
    pub state: CircuitState,
    /// Timestamps of monitored failures within the sliding window.
    failures: Vec<DateTime<Utc>>,
    /// Consecutive successes while half-open.
    half_open_successes: u32,
    /// Whether the single half-open probe slot is taken.
    probe_in_flight: bool,
    pub opened_at: Option<DateTime<Utc>>,
    /// Total times this circuit opened.
    pub open_count: u32,
}

impl CircuitBreaker {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            state: CircuitState::Closed,
            failures: Vec::new(),
            half_open_successes: 0,
            probe_in_flight: false,
            opened_at: None,
            open_count: 0,
        }
    }

    fn window(config: &BreakerConfig) -> Duration {
        Duration::milliseconds(config.failure_window_ms as i64)
    }

    fn timeout(config: &BreakerConfig) -> Duration {
        Duration::milliseconds(config.timeout_ms as i64)
    }

    /// Admission check. May transition Open -> HalfOpen when the timeout
    /// has elapsed; the transitioning caller receives the probe slot.
    pub fn check(&mut self, config: &BreakerConfig, now: DateTime<Utc>) -> BreakerCheck {
        match self.state {
            CircuitState::Closed => BreakerCheck::Allowed,
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let retry_after = opened_at + Self::timeout(config);
                if now >= retry_after {
                    self.half_open();
                    self.probe_in_flight = true;
                    BreakerCheck::Probe
                } else {
                    BreakerCheck::Blocked { retry_after }
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    // Invariant: concurrent in-flight probes <= 1.
                    let retry_after = self.opened_at.unwrap_or(now) + Self::timeout(config);
                    BreakerCheck::Blocked { retry_after }
                } else {
                    self.probe_in_flight = true;
                    BreakerCheck::Probe
                }
            }
        }
    }

    /// Record a monitored failure.
    pub fn record_failure(&mut self, config: &BreakerConfig, now: DateTime<Utc>) {
        self.probe_in_flight = false;
        self.failures.push(now);
        let cutoff = now - Self::window(config);
        self.failures.retain(|t| *t > cutoff);

        match self.state {
            CircuitState::Closed => {
                if self.failures.len() as u32 >= config.failure_threshold {
                    self.open(now);
                }
            }
            // Any failure in half-open reopens the circuit.
            CircuitState::HalfOpen => self.open(now),
            CircuitState::Open => {}
        }
    }

    /// Record a success.
    pub fn record_success(&mut self, config: &BreakerConfig) {
        self.probe_in_flight = false;
        if self.state == CircuitState::HalfOpen {
            self.half_open_successes += 1;
            if self.half_open_successes >= config.success_threshold {
                self.close();
            }
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
        self.probe_in_flight = false;
        self.open_count += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.half_open_successes = 0;
        self.probe_in_flight = false;
        self.failures.clear();
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.half_open_successes = 0;
        self.probe_in_flight = false;
    }

    /// Failures within the window as of `now`.
    pub fn recent_failure_count(&self, config: &BreakerConfig, now: DateTime<Utc>) -> usize {
        let cutoff = now - Self::window(config);
        self.failures.iter().filter(|t| **t > cutoff).count()
    }

    fn to_snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            tool_id: self.tool_id.clone(),
            state: self.state.as_str().to_string(),
            failure_count: self.failures.len() as u32,
            success_count: self.half_open_successes,
            opened_at: self.opened_at,
        }
    }

    fn from_snapshot(snapshot: &BreakerSnapshot) -> Self {
        let state = CircuitState::from_str(&snapshot.state).unwrap_or(CircuitState::Closed);
        Self {
            tool_id: snapshot.tool_id.clone(),
            state,
            // Window timestamps are not persisted; restored failures count
            // from the restart instant.
            failures: vec![Utc::now(); snapshot.failure_count as usize],
            half_open_successes: snapshot.success_count,
            probe_in_flight: false,
            opened_at: snapshot.opened_at,
            open_count: 0,
        }
    }
}

/// Point-in-time view of one breaker for status output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub tool_id: String,
    pub state: String,
    pub recent_failures: usize,
    pub open_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Registry of circuit breakers keyed by tool id.
pub struct CircuitBreakerRegistry {
    config: BreakerSection,
    circuits: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerSection) -> Self {
        Self {
            config,
            circuits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BreakerSection::default())
    }

    /// Admission check for a tool.
    pub async fn check(&self, tool_id: &str) -> BreakerCheck {
        let config = self.config.for_tool(tool_id).clone();
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(tool_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(tool_id));
        circuit.check(&config, Utc::now())
    }

    /// Record a monitored failure for a tool.
    pub async fn record_failure(&self, tool_id: &str) {
        let config = self.config.for_tool(tool_id).clone();
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(tool_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(tool_id));
        let was_closed = circuit.state == CircuitState::Closed;
        circuit.record_failure(&config, Utc::now());
        if was_closed && circuit.state == CircuitState::Open {
            tracing::warn!(tool_id, open_count = circuit.open_count, "circuit opened");
        }
    }

    /// Record a success for a tool.
    pub async fn record_success(&self, tool_id: &str) {
        let config = self.config.for_tool(tool_id).clone();
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(tool_id) {
            let was_half_open = circuit.state == CircuitState::HalfOpen;
            circuit.record_success(&config);
            if was_half_open && circuit.state == CircuitState::Closed {
                tracing::info!(tool_id, "circuit closed after recovery");
            }
        }
    }

    pub async fn state(&self, tool_id: &str) -> Option<CircuitState> {
        let circuits = self.circuits.read().await;
        circuits.get(tool_id).map(|c| c.state)
    }

    pub async fn stats(&self) -> Vec<BreakerStats> {
        let now = Utc::now();
        let circuits = self.circuits.read().await;
        circuits
            .values()
            .map(|c| BreakerStats {
                tool_id: c.tool_id.clone(),
                state: c.state.as_str().to_string(),
                recent_failures: c.recent_failure_count(self.config.for_tool(&c.tool_id), now),
                open_count: c.open_count,
                opened_at: c.opened_at,
            })
            .collect()
    }

    /// Export all breakers for shutdown persistence.
    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let circuits = self.circuits.read().await;
        circuits.values().map(CircuitBreaker::to_snapshot).collect()
    }

    /// Restore breakers from persisted snapshots at startup.
    pub async fn restore(&self, snapshots: &[BreakerSnapshot]) {
        let mut circuits = self.circuits.write().await;
        for snapshot in snapshots {
            circuits.insert(snapshot.tool_id.clone(), CircuitBreaker::from_snapshot(snapshot));
        }
    }

    /// Manually reset one breaker.
    pub async fn reset(&self, tool_id: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(tool_id) {
            circuit.close();
            circuit.open_count = 0;
        }
    }
}
