//! Orchestrator assembly.
//!
//! Wires the engine from config: store, resilience registries (restored
//! from their persisted snapshots), governor, router, runtime, gates, and
//! scheduler. [`Orchestrator::shutdown`] persists resilience snapshots so
//! the next process restarts warm.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::webhook::WebhookNotifier;
use crate::domain::errors::DomainResult;
use crate::domain::models::{Config, PipelineDefinition};
use crate::domain::ports::{LogNotifier, NotificationChannel, StateStore};
use crate::services::agent_runtime::AgentRuntime;
use crate::services::budget_governor::BudgetGovernor;
use crate::services::circuit_breaker::CircuitBreakerRegistry;
use crate::services::gate_service::GateService;
use crate::services::rate_limiter::RateLimiterRegistry;
use crate::services::retry::RetryPolicy;
use crate::services::run_events::RunEventBus;
use crate::services::scheduler::Scheduler;
use crate::services::tool_router::{OpPolicy, ToolRegistry, ToolRouter};
use crate::services::workflow_engine::{AgentRegistry, WorkflowEngine};

/// A fully wired orchestrator instance.
pub struct Orchestrator {
    pub engine: Arc<WorkflowEngine>,
    pub store: Arc<dyn StateStore>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub limiters: Arc<RateLimiterRegistry>,
    pub events: Arc<RunEventBus>,
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Persist resilience snapshots for warm restart.
    pub async fn shutdown(&self) -> DomainResult<()> {
        let breakers = self.breakers.snapshot().await;
        self.store.save_breaker_snapshots(&breakers).await?;
        let limiters = self.limiters.snapshot().await;
        self.store.save_limiter_snapshots(&limiters).await?;
        tracing::info!(
            breakers = breakers.len(),
            limiters = limiters.len(),
            "resilience snapshots persisted"
        );
        Ok(())
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: Config,
    store: Option<Arc<dyn StateStore>>,
    notifier: Option<Arc<dyn NotificationChannel>>,
    agents: AgentRegistry,
    tools: ToolRegistry,
    policies: Vec<OpPolicy>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            notifier: None,
            agents: AgentRegistry::new(),
            tools: ToolRegistry::new(),
            policies: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationChannel>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn register_agent(mut self, logic: Arc<dyn crate::domain::ports::AgentLogic>) -> Self {
        self.agents.register(logic);
        self
    }

    pub fn register_tool(mut self, tool: Arc<dyn crate::domain::ports::ToolAdapter>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_policy(mut self, policy: OpPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Assemble the orchestrator, restoring resilience snapshots.
    pub async fn build(self) -> DomainResult<Orchestrator> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(crate::infrastructure::database::MemoryStateStore::new()));

        let notifier: Arc<dyn NotificationChannel> = match self.notifier {
            Some(notifier) => notifier,
            None => match &self.config.notifications.webhook_url {
                Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
                None => Arc::new(LogNotifier),
            },
        };

        let breakers = Arc::new(CircuitBreakerRegistry::new(self.config.breaker.clone()));
        breakers.restore(&store.load_breaker_snapshots().await?).await;

        let limiters = Arc::new(RateLimiterRegistry::new(self.config.rate.clone()));
        limiters.restore(&store.load_limiter_snapshots().await?).await;

        let governor = Arc::new(BudgetGovernor::new(
            self.config.budget.clone(),
            Arc::clone(&store),
            Arc::clone(&notifier),
        ));

        let mut router = ToolRouter::new(
            self.tools,
            Arc::clone(&breakers),
            Arc::clone(&limiters),
            Arc::clone(&governor),
            Arc::clone(&store),
            Duration::from_secs(self.config.runtime.tool_timeout_secs),
        );
        for policy in self.policies {
            router.set_policy(policy);
        }
        let router = Arc::new(router);

        let scheduler = Arc::new(Scheduler::new(&self.config.concurrency, &self.config.scheduler));
        let events = Arc::new(RunEventBus::default());

        let runtime = Arc::new(AgentRuntime::new(
            Arc::clone(&store),
            Arc::clone(&router),
            Arc::clone(&scheduler),
            Arc::clone(&events),
            RetryPolicy::from_config(&self.config.retry.default),
            Duration::from_secs(self.config.runtime.cancel_grace_secs),
            Duration::from_millis(self.config.runtime.rate_limit_defer_ms),
        ));

        let gates = Arc::new(GateService::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&events),
            self.config.gates.clone(),
        ));

        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&store),
            runtime,
            gates,
            scheduler,
            governor,
            Arc::clone(&router),
            notifier,
            Arc::clone(&events),
            Arc::new(self.agents),
            PipelineDefinition::standard(),
            self.config.runtime.max_compensation_attempts,
        ));

        Ok(Orchestrator {
            engine,
            store,
            breakers,
            limiters,
            events,
        })
    }
}
