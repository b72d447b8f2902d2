//! Configuration tree for the cadence orchestrator.
//!
//! Loaded by the infrastructure config loader (defaults, then
//! `cadence.yaml`, then `CADENCE_*` environment variables).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub concurrency: ConcurrencyConfig,
    pub retry: RetrySection,
    pub breaker: BreakerSection,
    pub rate: RateSection,
    pub budget: BudgetConfig,
    pub gates: GatesConfig,
    pub scheduler: SchedulerConfig,
    pub runtime: RuntimeConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
}

/// Worker-pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Parallel agents in flight.
    pub agent_workers: usize,
    /// Parallel tool invocations.
    pub tool_workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            agent_workers: 16,
            tool_workers: 64,
        }
    }
}

/// Retry policy parameters (exponential backoff with full jitter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
        }
    }
}

/// Retry defaults plus per-tool overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub default: RetryConfig,
    pub tools: HashMap<String, RetryConfig>,
}

impl RetrySection {
    pub fn for_tool(&self, tool_id: &str) -> &RetryConfig {
        self.tools.get(tool_id).unwrap_or(&self.default)
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within the window before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing.
    pub timeout_ms: u64,
    /// Sliding window for failure counting.
    pub failure_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            failure_window_ms: 120_000,
        }
    }
}

/// Breaker defaults plus per-tool overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub default: BreakerConfig,
    pub tools: HashMap<String, BreakerConfig>,
}

impl BreakerSection {
    pub fn for_tool(&self, tool_id: &str) -> &BreakerConfig {
        self.tools.get(tool_id).unwrap_or(&self.default)
    }
}

/// Token bucket parameters for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Burst allowance (bucket capacity).
    pub capacity: f64,
    /// Steady-state refill in tokens per second.
    pub refill_per_sec: f64,
    /// Maximum time to wait for a token before reporting rate_limited.
    pub wait_deadline_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_sec: 5.0,
            wait_deadline_ms: 10_000,
        }
    }
}

/// Rate limits: defaults plus per-tool overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSection {
    pub default: RateConfig,
    pub tools: HashMap<String, RateConfig>,
}

impl RateSection {
    pub fn for_tool(&self, tool_id: &str) -> &RateConfig {
        self.tools.get(tool_id).unwrap_or(&self.default)
    }
}

/// Budget caps. The run cap itself comes from [`RunConfig`]; this section
/// holds the optional per-tool and per-phase caps and warning threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Fallback run cap when the run config does not set one.
    pub run_cap_usd: f64,
    /// Per-tool caps in USD, keyed by tool id.
    pub tool_caps_usd: HashMap<String, f64>,
    /// Per-phase caps in USD, keyed by phase name.
    pub phase_caps_usd: HashMap<String, f64>,
    /// Fraction of any cap at which a warning is emitted.
    pub warn_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            run_cap_usd: 50.0,
            tool_caps_usd: HashMap::new(),
            phase_caps_usd: HashMap::new(),
            warn_threshold: 0.8,
        }
    }
}

/// Auto-approve predicate for one phase's gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApproveConfig {
    pub enabled: bool,
    /// Minimum `quality_score` in the gate artifact for auto-approval.
    pub min_quality_score: f64,
}

impl Default for AutoApproveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_quality_score: 0.9,
        }
    }
}

/// Human gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    /// Default decision deadline in seconds.
    pub deadline_secs: u64,
    /// Poll interval while awaiting a decision.
    pub poll_interval_ms: u64,
    /// Auto-approve predicates keyed by phase name.
    pub auto_approve: HashMap<String, AutoApproveConfig>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 86_400,
            poll_interval_ms: 500,
            auto_approve: HashMap::new(),
        }
    }
}

/// Scheduler backpressure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum queued (not yet admitted) jobs per kind.
    pub queue_bound: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { queue_bound: 1_024 }
    }
}

/// Agent runtime knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Grace window for in-flight tools on cancellation, in seconds.
    pub cancel_grace_secs: u64,
    /// Per-invocation timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Default deferral when rate-limited without a Retry-After hint.
    pub rate_limit_defer_ms: u64,
    /// Maximum compensation attempts per agent.
    pub max_compensation_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cancel_grace_secs: 10,
            tool_timeout_secs: 120,
            rate_limit_defer_ms: 5_000,
            max_compensation_attempts: 3,
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".cadence/cadence.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Notification channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook URL; when unset, notifications go to the log channel.
    pub webhook_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrency.agent_workers, 16);
        assert_eq!(config.concurrency.tool_workers, 64);
        assert_eq!(config.retry.default.max_attempts, 3);
        assert_eq!(config.breaker.default.failure_threshold, 5);
        assert_eq!(config.budget.warn_threshold, 0.8);
        assert_eq!(config.runtime.cancel_grace_secs, 10);
        assert_eq!(config.runtime.max_compensation_attempts, 3);
    }

    #[test]
    fn test_per_tool_overrides() {
        let mut section = BreakerSection::default();
        section.tools.insert(
            "hunter_io".to_string(),
            BreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );
        assert_eq!(section.for_tool("hunter_io").failure_threshold, 3);
        assert_eq!(section.for_tool("other").failure_threshold, 5);
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
