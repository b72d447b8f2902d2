//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;

use crate::domain::models::Config;

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `cadence.yaml` in the working directory (optional)
    /// 3. Environment variables (`CADENCE_*`, `__` as section separator)
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new("cadence.yaml"))
    }

    /// Load with an explicit config file path (missing file is fine).
    pub fn load_from(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .context("Failed to load configuration")?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<()> {
        anyhow::ensure!(
            config.concurrency.agent_workers >= 1,
            "concurrency.agent_workers must be at least 1"
        );
        anyhow::ensure!(
            config.concurrency.tool_workers >= 1,
            "concurrency.tool_workers must be at least 1"
        );
        anyhow::ensure!(
            config.retry.default.max_attempts >= 1,
            "retry.default.max_attempts must be at least 1"
        );
        anyhow::ensure!(
            config.retry.default.base_delay_ms <= config.retry.default.max_delay_ms,
            "retry.default.base_delay_ms must not exceed max_delay_ms"
        );
        anyhow::ensure!(
            config.rate.default.capacity > 0.0 && config.rate.default.refill_per_sec > 0.0,
            "rate.default capacity and refill_per_sec must be positive"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&config.budget.warn_threshold),
            "budget.warn_threshold must be within [0, 1]"
        );
        anyhow::ensure!(!config.database.path.is_empty(), "database.path must not be empty");
        Ok(())
    }
}
