//! Budget and cost governance.
//!
//! The governor authorizes every tool dispatch against the run cap plus
//! optional per-phase and per-tool caps, and records actual charges in the
//! append-only ledger. Denial is permanent for the requesting agent.
//! Warnings (not denials) are emitted once per cap at the configured
//! threshold, default 80%.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BudgetConfig, Phase};
use crate::domain::ports::{BudgetTotals, Notification, NotificationChannel, Severity, StateStore};

/// Result of a pre-dispatch authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    Deny { reason: String },
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

struct RunBudget {
    cap_usd: f64,
    notification_target: Option<String>,
    totals: BudgetTotals,
    /// Caps already warned about, to keep warnings one-shot per run.
    warned: HashSet<String>,
}

/// Central budget authority, shared across a run's agents.
pub struct BudgetGovernor {
    config: BudgetConfig,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn NotificationChannel>,
    runs: RwLock<HashMap<Uuid, RunBudget>>,
}

impl BudgetGovernor {
    pub fn new(
        config: BudgetConfig,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a run before its first dispatch, hydrating totals from the
    /// durable ledger so resumed runs keep their spend history.
    pub async fn register_run(
        &self,
        run_id: Uuid,
        cap_usd: f64,
        notification_target: Option<String>,
    ) -> DomainResult<()> {
        let totals = self.store.budget_totals(run_id).await?;
        let mut runs = self.runs.write().await;
        runs.insert(
            run_id,
            RunBudget {
                cap_usd,
                notification_target,
                totals,
                warned: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Drop in-memory accounting for a finished run.
    pub async fn release_run(&self, run_id: Uuid) {
        self.runs.write().await.remove(&run_id);
    }

    /// Authorize an estimated spend before tool dispatch.
    ///
    /// Denies when the run cap, the phase cap, or the tool cap would be
    /// exceeded by `estimated_usd`.
    pub async fn authorize(
        &self,
        run_id: Uuid,
        tool_id: &str,
        phase: Phase,
        estimated_usd: f64,
    ) -> Authorization {
        let runs = self.runs.read().await;
        let Some(budget) = runs.get(&run_id) else {
            return Authorization::Deny {
                reason: format!("run {run_id} is not registered with the budget governor"),
            };
        };

        let projected_run = budget.totals.run_total_usd + estimated_usd;
        if projected_run > budget.cap_usd {
            return Authorization::Deny {
                reason: format!(
                    "run cap {:.2} would be exceeded: spent {:.2}, estimated {:.2}",
                    budget.cap_usd, budget.totals.run_total_usd, estimated_usd
                ),
            };
        }

        if let Some(phase_cap) = self.config.phase_caps_usd.get(phase.as_str()) {
            let projected = budget.totals.phase_total(phase) + estimated_usd;
            if projected > *phase_cap {
                return Authorization::Deny {
                    reason: format!(
                        "phase {} cap {:.2} would be exceeded: spent {:.2}, estimated {:.2}",
                        phase,
                        phase_cap,
                        budget.totals.phase_total(phase),
                        estimated_usd
                    ),
                };
            }
        }

        if let Some(tool_cap) = self.config.tool_caps_usd.get(tool_id) {
            let projected = budget.totals.tool_total(tool_id) + estimated_usd;
            if projected > *tool_cap {
                return Authorization::Deny {
                    reason: format!(
                        "tool {} cap {:.2} would be exceeded: spent {:.2}, estimated {:.2}",
                        tool_id,
                        tool_cap,
                        budget.totals.tool_total(tool_id),
                        estimated_usd
                    ),
                };
            }
        }

        Authorization::Allow
    }

    /// Record the billed cost of a completed invocation.
    pub async fn charge(
        &self,
        run_id: Uuid,
        tool_id: &str,
        phase: Phase,
        actual_usd: f64,
    ) -> DomainResult<()> {
        if actual_usd <= 0.0 {
            return Ok(());
        }

        self.store.append_budget(run_id, tool_id, phase, actual_usd).await?;

        let mut warnings: Vec<(Option<String>, Notification)> = Vec::new();
        {
            let mut runs = self.runs.write().await;
            let Some(budget) = runs.get_mut(&run_id) else {
                return Ok(());
            };
            budget.totals.run_total_usd += actual_usd;
            *budget
                .totals
                .by_tool_usd
                .entry(tool_id.to_string())
                .or_insert(0.0) += actual_usd;
            *budget
                .totals
                .by_phase_usd
                .entry(phase.as_str().to_string())
                .or_insert(0.0) += actual_usd;

            let threshold = self.config.warn_threshold;
            let run_spent = budget.totals.run_total_usd;
            if run_spent >= budget.cap_usd * threshold && budget.warned.insert("run".to_string()) {
                warnings.push((
                    budget.notification_target.clone(),
                    Notification::new(
                        Severity::Warning,
                        "budget warning",
                        format!(
                            "run {run_id} spent {:.2} of {:.2} USD ({:.0}%)",
                            run_spent,
                            budget.cap_usd,
                            run_spent / budget.cap_usd * 100.0
                        ),
                    ),
                ));
            }

            if let Some(tool_cap) = self.config.tool_caps_usd.get(tool_id) {
                let spent = budget.totals.tool_total(tool_id);
                if spent >= tool_cap * threshold && budget.warned.insert(format!("tool:{tool_id}")) {
                    warnings.push((
                        budget.notification_target.clone(),
                        Notification::new(
                            Severity::Warning,
                            "budget warning",
                            format!("tool {tool_id} spent {spent:.2} of {tool_cap:.2} USD cap in run {run_id}"),
                        ),
                    ));
                }
            }

            if let Some(phase_cap) = self.config.phase_caps_usd.get(phase.as_str()) {
                let spent = budget.totals.phase_total(phase);
                if spent >= phase_cap * threshold && budget.warned.insert(format!("phase:{phase}")) {
                    warnings.push((
                        budget.notification_target.clone(),
                        Notification::new(
                            Severity::Warning,
                            "budget warning",
                            format!("phase {phase} spent {spent:.2} of {phase_cap:.2} USD cap in run {run_id}"),
                        ),
                    ));
                }
            }
        }

        for (target, notification) in warnings {
            self.notifier.send(target.as_deref(), &notification).await;
        }
        Ok(())
    }

    /// Total recorded spend for a run.
    pub async fn run_spend(&self, run_id: Uuid) -> f64 {
        let runs = self.runs.read().await;
        runs.get(&run_id).map_or(0.0, |b| b.totals.run_total_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::LogNotifier;
    use crate::infrastructure::database::MemoryStateStore;

    async fn make_governor(config: BudgetConfig) -> (Arc<BudgetGovernor>, Uuid) {
        let store = Arc::new(MemoryStateStore::new());
        let governor = Arc::new(BudgetGovernor::new(config, store, Arc::new(LogNotifier)));
        let run_id = Uuid::new_v4();
        governor.register_run(run_id, 10.0, None).await.unwrap();
        (governor, run_id)
    }

    #[tokio::test]
    async fn test_authorize_within_cap() {
        let (governor, run_id) = make_governor(BudgetConfig::default()).await;
        let auth = governor
            .authorize(run_id, "serp", Phase::MarketIntelligence, 1.0)
            .await;
        assert!(auth.is_allowed());
    }

    #[tokio::test]
    async fn test_deny_when_run_cap_exceeded() {
        let (governor, run_id) = make_governor(BudgetConfig::default()).await;
        governor
            .charge(run_id, "serp", Phase::MarketIntelligence, 9.5)
            .await
            .unwrap();

        let auth = governor
            .authorize(run_id, "serp", Phase::MarketIntelligence, 1.0)
            .await;
        assert!(matches!(auth, Authorization::Deny { .. }));

        // A smaller call still fits.
        let auth = governor
            .authorize(run_id, "serp", Phase::MarketIntelligence, 0.25)
            .await;
        assert!(auth.is_allowed());
    }

    #[tokio::test]
    async fn test_deny_on_tool_cap() {
        let mut config = BudgetConfig::default();
        config.tool_caps_usd.insert("clearbit".to_string(), 1.0);
        let (governor, run_id) = make_governor(config).await;

        governor.charge(run_id, "clearbit", Phase::Verification, 0.9).await.unwrap();
        let auth = governor.authorize(run_id, "clearbit", Phase::Verification, 0.2).await;
        assert!(matches!(auth, Authorization::Deny { .. }));

        // Other tools are unaffected.
        let auth = governor.authorize(run_id, "serp", Phase::Verification, 0.2).await;
        assert!(auth.is_allowed());
    }

    #[tokio::test]
    async fn test_deny_on_phase_cap() {
        let mut config = BudgetConfig::default();
        config.phase_caps_usd.insert("verification".to_string(), 2.0);
        let (governor, run_id) = make_governor(config).await;

        governor.charge(run_id, "zerobounce", Phase::Verification, 1.9).await.unwrap();
        let auth = governor.authorize(run_id, "zerobounce", Phase::Verification, 0.5).await;
        assert!(matches!(auth, Authorization::Deny { .. }));
    }

    #[tokio::test]
    async fn test_unregistered_run_denied() {
        let store = Arc::new(MemoryStateStore::new());
        let governor = BudgetGovernor::new(BudgetConfig::default(), store, Arc::new(LogNotifier));
        let auth = governor
            .authorize(Uuid::new_v4(), "serp", Phase::Execution, 0.1)
            .await;
        assert!(matches!(auth, Authorization::Deny { .. }));
    }

    #[tokio::test]
    async fn test_charges_accumulate_and_persist() {
        let store = Arc::new(MemoryStateStore::new());
        let governor = BudgetGovernor::new(BudgetConfig::default(), Arc::clone(&store) as Arc<dyn StateStore>, Arc::new(LogNotifier));
        let run_id = Uuid::new_v4();
        governor.register_run(run_id, 10.0, None).await.unwrap();

        governor.charge(run_id, "serp", Phase::MarketIntelligence, 0.5).await.unwrap();
        governor.charge(run_id, "hunter", Phase::LeadAcquisition, 0.25).await.unwrap();
        assert!((governor.run_spend(run_id).await - 0.75).abs() < f64::EPSILON);

        // Re-registration hydrates from the durable ledger.
        governor.release_run(run_id).await;
        governor.register_run(run_id, 10.0, None).await.unwrap();
        assert!((governor.run_spend(run_id).await - 0.75).abs() < 1e-9);
    }
}
