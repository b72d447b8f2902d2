//! Retry policy with exponential backoff and full jitter.
//!
//! Delay for attempt `n` is uniform random in
//! `[0, min(max_delay, base_delay * base^(n-1))]`. Rate-limited failures
//! carrying a Retry-After hint honor the hint (capped at `max_delay`) and
//! do not consume an attempt; that bookkeeping lives in the agent runtime.

use rand::Rng;
use std::time::Duration;

use crate::domain::models::RetryConfig;

/// Backoff calculator for agent-level retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: config.exponential_base,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Upper bound of the backoff window for a 1-based attempt number.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let scaled = self.base_delay.as_millis() as f64 * self.exponential_base.powi(exp as i32);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Full-jitter delay for a 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(jittered)
    }

    /// Deferral for a rate-limited failure: the provider hint capped at
    /// `max_delay`, or `fallback` when no hint was supplied.
    pub fn rate_limit_delay(&self, retry_after: Option<Duration>, fallback: Duration) -> Duration {
        retry_after.unwrap_or(fallback).min(self.max_delay)
    }
}
