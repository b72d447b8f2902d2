//! Tool router: tier-ordered selection and invocation of external tools.
//!
//! Given an abstract operation, the router picks concrete adapters by cost
//! tier and selection mode (waterfall, fanout, coverage), deduplicates
//! concurrent identical requests through the single-flight map, consults
//! the circuit breaker and rate limiter before every call, clears spend
//! with the budget governor, and records a [`ToolInvocation`] row for each
//! underlying call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::ErrorClass;
use crate::domain::models::{
    InvocationKey, InvocationOutcome, Phase, ToolInvocation, ToolTier,
};
use crate::domain::ports::{StateStore, ToolAdapter, ToolError, ToolFailure, ToolRequest};
use crate::services::budget_governor::{Authorization, BudgetGovernor};
use crate::services::circuit_breaker::{BreakerCheck, CircuitBreakerRegistry};
use crate::services::rate_limiter::{AcquireOutcome, RateLimiterRegistry};
use crate::services::single_flight::{Entry, SingleFlight};

/// How the router selects tools for one abstract operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Escalate tier by tier while results are insufficient.
    Waterfall,
    /// Invoke the top-K tools of the lowest permitted tiers in parallel.
    Fanout { top_k: usize },
    /// Escalate until the merged result count reaches the threshold,
    /// returning whatever was gathered at exhaustion.
    CoverageFirst,
}

/// Routing policy for one abstract operation.
#[derive(Debug, Clone)]
pub struct OpPolicy {
    pub op: String,
    pub mode: SelectionMode,
    /// Highest tier the router may escalate to.
    pub max_tier: ToolTier,
    /// Sufficiency predicate: minimum merged result count.
    pub min_results: usize,
    /// JSON object field used to dedupe merged results (e.g. "url").
    pub dedupe_field: Option<String>,
}

impl OpPolicy {
    pub fn waterfall(op: impl Into<String>, min_results: usize) -> Self {
        Self {
            op: op.into(),
            mode: SelectionMode::Waterfall,
            max_tier: ToolTier::Expensive,
            min_results,
            dedupe_field: None,
        }
    }

    pub fn fanout(op: impl Into<String>, top_k: usize) -> Self {
        Self {
            op: op.into(),
            mode: SelectionMode::Fanout { top_k },
            max_tier: ToolTier::Expensive,
            min_results: 1,
            dedupe_field: None,
        }
    }

    pub fn coverage(op: impl Into<String>, min_results: usize) -> Self {
        Self {
            op: op.into(),
            mode: SelectionMode::CoverageFirst,
            max_tier: ToolTier::Expensive,
            min_results,
            dedupe_field: None,
        }
    }

    pub fn with_max_tier(mut self, tier: ToolTier) -> Self {
        self.max_tier = tier;
        self
    }

    pub fn with_dedupe_field(mut self, field: impl Into<String>) -> Self {
        self.dedupe_field = Some(field.into());
        self
    }

    fn default_for(op: &str) -> Self {
        Self::waterfall(op, 1)
    }
}

/// Registry of tool adapters grouped by abstract operation.
#[derive(Default)]
pub struct ToolRegistry {
    by_op: HashMap<String, Vec<Arc<dyn ToolAdapter>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for every op it declares. Within an op, tools
    /// are kept sorted by (tier, tool_id) so selection order is stable.
    pub fn register(&mut self, tool: Arc<dyn ToolAdapter>) {
        for op in tool.ops() {
            let entry = self.by_op.entry(op).or_default();
            entry.push(Arc::clone(&tool));
            entry.sort_by(|a, b| a.tier().cmp(&b.tier()).then_with(|| a.tool_id().cmp(b.tool_id())));
        }
    }

    /// Tools serving `op` in exactly `tier`.
    pub fn tools_for(&self, op: &str, tier: ToolTier) -> Vec<Arc<dyn ToolAdapter>> {
        self.by_op
            .get(op)
            .map(|tools| tools.iter().filter(|t| t.tier() == tier).cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_op(&self, op: &str) -> bool {
        self.by_op.get(op).is_some_and(|tools| !tools.is_empty())
    }
}

/// Context for a routed tool call.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub phase: Phase,
    pub cancel: CancellationToken,
}

/// Result of routing one abstract request.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// Merged successful payload, or the composite failure.
    pub result: Result<serde_json::Value, ToolFailure>,
    /// Per-source error map (tool_id -> message) for observability.
    pub source_errors: HashMap<String, String>,
}

impl RouteOutcome {
    fn failure(class: ErrorClass, message: impl Into<String>, source_errors: HashMap<String, String>) -> Self {
        Self {
            result: Err(ToolFailure::new(class, message)),
            source_errors,
        }
    }
}

/// Tier-ordered tool selection and invocation.
pub struct ToolRouter {
    registry: ToolRegistry,
    policies: HashMap<String, OpPolicy>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiters: Arc<RateLimiterRegistry>,
    governor: Arc<BudgetGovernor>,
    store: Arc<dyn StateStore>,
    flight: SingleFlight,
    tool_timeout: Duration,
}

impl ToolRouter {
    pub fn new(
        registry: ToolRegistry,
        breakers: Arc<CircuitBreakerRegistry>,
        limiters: Arc<RateLimiterRegistry>,
        governor: Arc<BudgetGovernor>,
        store: Arc<dyn StateStore>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            policies: HashMap::new(),
            breakers,
            limiters,
            governor,
            store,
            flight: SingleFlight::new(),
            tool_timeout,
        }
    }

    /// Register a routing policy for an operation.
    pub fn set_policy(&mut self, policy: OpPolicy) {
        self.policies.insert(policy.op.clone(), policy);
    }

    fn policy(&self, op: &str) -> OpPolicy {
        self.policies
            .get(op)
            .cloned()
            .unwrap_or_else(|| OpPolicy::default_for(op))
    }

    /// Drop per-run cache entries once a run reaches a terminal status.
    pub async fn purge_run(&self, run_id: Uuid) {
        self.flight.purge_run(run_id).await;
    }

    /// Route one abstract request.
    pub async fn dispatch(&self, ctx: &ToolCallContext, request: &ToolRequest) -> RouteOutcome {
        if !self.registry.has_op(&request.op) {
            return RouteOutcome::failure(
                ErrorClass::Permanent,
                format!("no tool registered for op {}", request.op),
                HashMap::new(),
            );
        }
        let policy = self.policy(&request.op);
        match policy.mode {
            SelectionMode::Waterfall => self.run_escalation(ctx, request, &policy, false).await,
            SelectionMode::CoverageFirst => self.run_escalation(ctx, request, &policy, true).await,
            SelectionMode::Fanout { top_k } => self.run_fanout(ctx, request, &policy, top_k).await,
        }
    }

    /// Waterfall / coverage escalation across tiers.
    ///
    /// Both modes merge results while escalating; they differ at
    /// exhaustion, where coverage keeps a non-empty partial set and
    /// waterfall reports a composite error when still insufficient.
    async fn run_escalation(
        &self,
        ctx: &ToolCallContext,
        request: &ToolRequest,
        policy: &OpPolicy,
        keep_partial: bool,
    ) -> RouteOutcome {
        let mut merged: Vec<serde_json::Value> = Vec::new();
        let mut source_errors: HashMap<String, String> = HashMap::new();
        let mut failure_classes: Vec<ErrorClass> = Vec::new();
        let mut retry_after_ms: Option<u64> = None;

        for tier in ToolTier::ALL {
            if tier > policy.max_tier {
                break;
            }
            if ctx.cancel.is_cancelled() {
                return RouteOutcome::failure(ErrorClass::Transient, "cancelled during dispatch", source_errors);
            }
            let tools = self.registry.tools_for(&request.op, tier);
            if tools.is_empty() {
                continue;
            }

            for tool in tools {
                match self.invoke_one(ctx, &tool, &request.op, &request.params).await {
                    Ok(value) => collect_values(&mut merged, value),
                    Err(failure) => {
                        if failure.class == ErrorClass::BudgetDenied {
                            source_errors.insert(tool.tool_id().to_string(), failure.message.clone());
                            return RouteOutcome {
                                result: Err(failure),
                                source_errors,
                            };
                        }
                        retry_after_ms = retry_after_ms.max(failure.retry_after_ms);
                        source_errors.insert(tool.tool_id().to_string(), failure.message);
                        failure_classes.push(failure.class);
                    }
                }
            }

            let deduped = dedupe_values(&merged, policy.dedupe_field.as_deref());
            if deduped.len() >= policy.min_results {
                return RouteOutcome {
                    result: Ok(serde_json::Value::Array(deduped)),
                    source_errors,
                };
            }
        }

        let deduped = dedupe_values(&merged, policy.dedupe_field.as_deref());
        if keep_partial && !deduped.is_empty() {
            return RouteOutcome {
                result: Ok(serde_json::Value::Array(deduped)),
                source_errors,
            };
        }

        let mut failure = ToolFailure::new(
            composite_class(&failure_classes),
            format!(
                "op {} exhausted tiers up to {}: {} results (needed {}), errors: [{}]",
                request.op,
                policy.max_tier,
                deduped.len(),
                policy.min_results,
                format_errors(&source_errors),
            ),
        );
        if let Some(ms) = retry_after_ms {
            failure = failure.with_retry_after_ms(ms);
        }
        RouteOutcome {
            result: Err(failure),
            source_errors,
        }
    }

    /// Parallel fanout over the top-K tools of the lowest permitted tiers.
    async fn run_fanout(
        &self,
        ctx: &ToolCallContext,
        request: &ToolRequest,
        policy: &OpPolicy,
        top_k: usize,
    ) -> RouteOutcome {
        let mut selected: Vec<Arc<dyn ToolAdapter>> = Vec::new();
        for tier in ToolTier::ALL {
            if tier > policy.max_tier || selected.len() >= top_k {
                break;
            }
            for tool in self.registry.tools_for(&request.op, tier) {
                if selected.len() >= top_k {
                    break;
                }
                selected.push(tool);
            }
        }

        let invocations = selected.iter().map(|tool| {
            let tool = Arc::clone(tool);
            async move {
                let outcome = self.invoke_one(ctx, &tool, &request.op, &request.params).await;
                (tool.tool_id().to_string(), outcome)
            }
        });
        let outcomes = futures::future::join_all(invocations).await;

        let mut merged: Vec<serde_json::Value> = Vec::new();
        let mut source_errors: HashMap<String, String> = HashMap::new();
        let mut failure_classes: Vec<ErrorClass> = Vec::new();
        let mut retry_after_ms: Option<u64> = None;
        let mut budget_denied: Option<ToolFailure> = None;

        for (tool_id, outcome) in outcomes {
            match outcome {
                Ok(value) => collect_values(&mut merged, value),
                Err(failure) => {
                    source_errors.insert(tool_id, failure.message.clone());
                    if failure.class == ErrorClass::BudgetDenied {
                        budget_denied = Some(failure);
                    } else {
                        retry_after_ms = retry_after_ms.max(failure.retry_after_ms);
                        failure_classes.push(failure.class);
                    }
                }
            }
        }

        if let Some(failure) = budget_denied {
            return RouteOutcome {
                result: Err(failure),
                source_errors,
            };
        }

        let deduped = dedupe_values(&merged, policy.dedupe_field.as_deref());
        if deduped.is_empty() {
            let mut failure = ToolFailure::new(
                composite_class(&failure_classes),
                format!(
                    "fanout for op {} produced no results, errors: [{}]",
                    request.op,
                    format_errors(&source_errors)
                ),
            );
            if let Some(ms) = retry_after_ms {
                failure = failure.with_retry_after_ms(ms);
            }
            return RouteOutcome {
                result: Err(failure),
                source_errors,
            };
        }

        RouteOutcome {
            result: Ok(serde_json::Value::Array(deduped)),
            source_errors,
        }
    }

    /// Invoke one concrete tool with single-flight dedup, breaker, rate
    /// limit, and budget checks. Records an invocation row for every
    /// underlying call (cache hits record nothing).
    async fn invoke_one(
        &self,
        ctx: &ToolCallContext,
        tool: &Arc<dyn ToolAdapter>,
        op: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolFailure> {
        let key = InvocationKey::new(ctx.run_id, tool.tool_id(), op, params);

        match self.flight.begin(&key).await {
            Entry::Ready(value) => return Ok(value),
            Entry::Wait(mut rx) => {
                return match rx.recv().await {
                    Ok(result) => result,
                    Err(_) => Err(ToolFailure::new(
                        ErrorClass::Transient,
                        "single-flight leader dropped",
                    )),
                };
            }
            Entry::Leader => {}
        }

        // Leader path: consult the durable per-run cache first so resumed
        // runs replay tool results instead of re-invoking.
        match self.store.get_cached_invocation(&key).await {
            Ok(Some(cached)) => {
                if let Some(value) = cached.result {
                    self.flight.publish(&key, Ok(value.clone())).await;
                    return Ok(value);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(tool_id = tool.tool_id(), error = %err, "invocation cache read failed");
            }
        }

        let result = self.invoke_uncached(ctx, tool, op, params, &key).await;
        self.flight.publish(&key, result.clone()).await;
        result
    }

    async fn invoke_uncached(
        &self,
        ctx: &ToolCallContext,
        tool: &Arc<dyn ToolAdapter>,
        op: &str,
        params: &serde_json::Value,
        key: &InvocationKey,
    ) -> Result<serde_json::Value, ToolFailure> {
        let tool_id = tool.tool_id().to_string();

        // Circuit breaker admission.
        let check = self.breakers.check(&tool_id).await;
        if let BreakerCheck::Blocked { retry_after } = check {
            let failure = ToolFailure::new(
                ErrorClass::CircuitOpen,
                format!("circuit open for {tool_id}, retry after {retry_after}"),
            );
            self.record(ctx, tool, key, InvocationOutcome::CircuitOpen, None, 0.0, 0, Some(&failure.message))
                .await;
            return Err(failure);
        }
        let is_probe = check == BreakerCheck::Probe;

        // Rate limiter token (waits up to the per-tool deadline).
        if self.limiters.acquire(&tool_id).await == AcquireOutcome::DeadlineExpired {
            if is_probe {
                // A probe slot must not leak when we never reached the tool.
                self.breakers.record_failure(&tool_id).await;
            }
            let failure = ToolFailure::new(
                ErrorClass::RateLimited,
                format!("rate limit wait deadline expired for {tool_id}"),
            );
            self.record(ctx, tool, key, InvocationOutcome::RateLimited, None, 0.0, 0, Some(&failure.message))
                .await;
            return Err(failure);
        }

        // Budget authorization.
        let estimate = tool.estimate_cost_usd(op);
        if let Authorization::Deny { reason } = self
            .governor
            .authorize(ctx.run_id, &tool_id, ctx.phase, estimate)
            .await
        {
            if is_probe {
                self.breakers.record_failure(&tool_id).await;
            }
            let failure = ToolFailure::new(ErrorClass::BudgetDenied, reason);
            self.record(ctx, tool, key, InvocationOutcome::BudgetDenied, None, 0.0, 0, Some(&failure.message))
                .await;
            return Err(failure);
        }

        // The invocation itself, bounded by the per-call timeout.
        let started = Instant::now();
        let invoked = tokio::time::timeout(self.tool_timeout, tool.invoke(op, params)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match invoked {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.tool_timeout)),
        };

        match result {
            Ok(output) => {
                self.breakers.record_success(&tool_id).await;
                if let Err(err) = self
                    .governor
                    .charge(ctx.run_id, &tool_id, ctx.phase, output.cost_usd)
                    .await
                {
                    tracing::warn!(tool_id, error = %err, "budget charge failed");
                }
                self.record(
                    ctx,
                    tool,
                    key,
                    InvocationOutcome::Success,
                    Some(output.value.clone()),
                    output.cost_usd,
                    latency_ms,
                    None,
                )
                .await;
                Ok(output.value)
            }
            Err(err) => {
                let class = err.class();
                // Only monitored failures count against the breaker:
                // timeouts, 5xx, connection errors. Client errors and
                // rate limits do not trip the circuit.
                if class == ErrorClass::Transient {
                    self.breakers.record_failure(&tool_id).await;
                } else if is_probe {
                    self.breakers.record_failure(&tool_id).await;
                }
                let outcome = match class {
                    ErrorClass::Transient => InvocationOutcome::RetryableFailure,
                    ErrorClass::RateLimited => InvocationOutcome::RateLimited,
                    _ => InvocationOutcome::PermanentFailure,
                };
                let mut failure = ToolFailure::new(class, err.to_string());
                if let Some(retry_after) = err.retry_after() {
                    failure = failure.with_retry_after_ms(retry_after.as_millis() as u64);
                }
                self.record(ctx, tool, key, outcome, None, 0.0, latency_ms, Some(&failure.message))
                    .await;
                Err(failure)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        ctx: &ToolCallContext,
        tool: &Arc<dyn ToolAdapter>,
        key: &InvocationKey,
        outcome: InvocationOutcome,
        result: Option<serde_json::Value>,
        cost_usd: f64,
        latency_ms: u64,
        error: Option<&str>,
    ) {
        let invocation = ToolInvocation {
            invocation_id: Uuid::new_v4(),
            task_id: ctx.task_id,
            run_id: ctx.run_id,
            tool_id: tool.tool_id().to_string(),
            op: key.op.clone(),
            params_hash: key.params_hash.clone(),
            tier: tool.tier(),
            result,
            cost_usd,
            latency_ms,
            outcome,
            error: error.map(str::to_string),
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = self.store.record_invocation(&invocation).await {
            tracing::warn!(tool_id = %invocation.tool_id, error = %err, "failed to record invocation");
        }
    }
}

/// Append a payload to the merge buffer, flattening arrays.
fn collect_values(merged: &mut Vec<serde_json::Value>, value: serde_json::Value) {
    match value {
        serde_json::Value::Array(items) => merged.extend(items),
        serde_json::Value::Null => {}
        other => merged.push(other),
    }
}

/// Dedupe merged results by an op-specific key field, or by whole value.
fn dedupe_values(values: &[serde_json::Value], field: Option<&str>) -> Vec<serde_json::Value> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let dedupe_key = match field {
            Some(f) => value
                .get(f)
                .map(ToString::to_string)
                .unwrap_or_else(|| value.to_string()),
            None => value.to_string(),
        };
        if seen.insert(dedupe_key) {
            out.push(value.clone());
        }
    }
    out
}

/// Composite classification for an all-sources failure.
fn composite_class(classes: &[ErrorClass]) -> ErrorClass {
    if classes.is_empty() {
        return ErrorClass::Permanent;
    }
    if classes.iter().all(|c| *c == ErrorClass::CircuitOpen) {
        return ErrorClass::CircuitOpen;
    }
    if classes.contains(&ErrorClass::Transient) {
        return ErrorClass::Transient;
    }
    if classes.contains(&ErrorClass::RateLimited) {
        return ErrorClass::RateLimited;
    }
    if classes.contains(&ErrorClass::CircuitOpen) {
        return ErrorClass::CircuitOpen;
    }
    ErrorClass::Permanent
}

fn format_errors(errors: &HashMap<String, String>) -> String {
    let mut parts: Vec<String> = errors.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    parts.sort();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_flattens_arrays() {
        let mut merged = Vec::new();
        collect_values(&mut merged, json!([1, 2]));
        collect_values(&mut merged, json!(3));
        collect_values(&mut merged, serde_json::Value::Null);
        assert_eq!(merged, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_dedupe_by_field() {
        let values = vec![
            json!({"url": "https://a", "rank": 1}),
            json!({"url": "https://b", "rank": 2}),
            json!({"url": "https://a", "rank": 3}),
        ];
        let deduped = dedupe_values(&values, Some("url"));
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0]["rank"], json!(1));
    }

    #[test]
    fn test_dedupe_whole_value() {
        let values = vec![json!("a"), json!("b"), json!("a")];
        assert_eq!(dedupe_values(&values, None).len(), 2);
    }

    #[test]
    fn test_composite_class_priorities() {
        assert_eq!(composite_class(&[]), ErrorClass::Permanent);
        assert_eq!(
            composite_class(&[ErrorClass::CircuitOpen, ErrorClass::CircuitOpen]),
            ErrorClass::CircuitOpen
        );
        assert_eq!(
            composite_class(&[ErrorClass::Permanent, ErrorClass::Transient]),
            ErrorClass::Transient
        );
        assert_eq!(
            composite_class(&[ErrorClass::Permanent, ErrorClass::RateLimited]),
            ErrorClass::RateLimited
        );
        assert_eq!(composite_class(&[ErrorClass::Permanent]), ErrorClass::Permanent);
    }

    #[test]
    fn test_registry_sorted_by_tier() {
        use crate::adapters::scripted::ScriptedTool;

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(
            ScriptedTool::new("expensive", ToolTier::Expensive, &["web_search"]).with_result(json!([1])),
        ));
        registry.register(Arc::new(
            ScriptedTool::new("free", ToolTier::Free, &["web_search"]).with_result(json!([2])),
        ));

        assert!(registry.has_op("web_search"));
        assert_eq!(registry.tools_for("web_search", ToolTier::Free).len(), 1);
        assert_eq!(registry.tools_for("web_search", ToolTier::Expensive).len(), 1);
        assert!(registry.tools_for("web_search", ToolTier::Cheap).is_empty());
    }
}
