//! Shared helpers for integration tests.

use cadence::domain::models::{AutoApproveConfig, Config, Phase, RunConfig};

/// Config tuned for fast tests: millisecond backoffs and gate polling.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.default.base_delay_ms = 1;
    config.retry.default.max_delay_ms = 50;
    config.gates.poll_interval_ms = 10;
    config.runtime.rate_limit_defer_ms = 10;
    config.runtime.cancel_grace_secs = 1;
    config.runtime.tool_timeout_secs = 5;
    config
}

/// Fast config with every gated phase set to auto-approve.
pub fn auto_approve_config() -> Config {
    let mut config = fast_config();
    for phase in [
        Phase::MarketIntelligence,
        Phase::LeadAcquisition,
        Phase::Verification,
        Phase::Personalization,
    ] {
        config.gates.auto_approve.insert(
            phase.as_str().to_string(),
            AutoApproveConfig {
                enabled: true,
                min_quality_score: 0.0,
            },
        );
    }
    config
}

pub fn run_config(budget_cap_usd: f64) -> RunConfig {
    RunConfig {
        campaign_name: "test-campaign".to_string(),
        input: serde_json::json!({"niche": "b2b saas"}),
        budget_cap_usd,
        notification_target: None,
    }
}
