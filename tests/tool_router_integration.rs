//! Tool router integration tests: tier selection, single-flight dedup,
//! budget denial, and breaker interaction.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cadence::adapters::scripted::ScriptedTool;
use cadence::domain::errors::ErrorClass;
use cadence::domain::models::{
    BreakerSection, BudgetConfig, InvocationOutcome, Phase, RateSection, ToolTier,
};
use cadence::domain::ports::{LogNotifier, StateStore, ToolError, ToolRequest};
use cadence::infrastructure::database::MemoryStateStore;
use cadence::services::budget_governor::BudgetGovernor;
use cadence::services::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use cadence::services::rate_limiter::RateLimiterRegistry;
use cadence::services::tool_router::{OpPolicy, ToolCallContext, ToolRegistry, ToolRouter};

struct Harness {
    router: Arc<ToolRouter>,
    store: Arc<MemoryStateStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    ctx: ToolCallContext,
}

async fn harness(
    tools: &[Arc<ScriptedTool>],
    policies: Vec<OpPolicy>,
    breaker_section: BreakerSection,
    run_cap_usd: f64,
) -> Harness {
    let store = Arc::new(MemoryStateStore::new());
    let breakers = Arc::new(CircuitBreakerRegistry::new(breaker_section));
    let limiters = Arc::new(RateLimiterRegistry::new(RateSection::default()));
    let governor = Arc::new(BudgetGovernor::new(
        BudgetConfig::default(),
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::new(LogNotifier),
    ));

    let run_id = Uuid::new_v4();
    governor.register_run(run_id, run_cap_usd, None).await.unwrap();

    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(Arc::clone(tool) as Arc<dyn cadence::domain::ports::ToolAdapter>);
    }

    let mut router = ToolRouter::new(
        registry,
        Arc::clone(&breakers),
        limiters,
        governor,
        Arc::clone(&store) as Arc<dyn StateStore>,
        Duration::from_secs(2),
    );
    for policy in policies {
        router.set_policy(policy);
    }

    Harness {
        router: Arc::new(router),
        store,
        breakers,
        ctx: ToolCallContext {
            run_id,
            task_id: Uuid::new_v4(),
            phase: Phase::MarketIntelligence,
            cancel: CancellationToken::new(),
        },
    }
}

fn results(value: &serde_json::Value) -> usize {
    value.as_array().map_or(0, Vec::len)
}

#[tokio::test]
async fn test_waterfall_satisfied_by_first_tier() {
    let free = Arc::new(
        ScriptedTool::new("free_search", ToolTier::Free, &["web_search"])
            .with_result(serde_json::json!([1, 2, 3, 4, 5])),
    );
    let paid = Arc::new(
        ScriptedTool::new("paid_search", ToolTier::Cheap, &["web_search"])
            .with_result(serde_json::json!([6, 7, 8, 9, 10])),
    );
    let h = harness(
        &[Arc::clone(&free), Arc::clone(&paid)],
        vec![OpPolicy::waterfall("web_search", 5)],
        BreakerSection::default(),
        10.0,
    )
    .await;

    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("web_search", serde_json::json!({"q": "x"})))
        .await;

    let value = outcome.result.unwrap();
    assert_eq!(results(&value), 5);
    assert_eq!(free.calls(), 1);
    assert_eq!(paid.calls(), 0, "tier 2 must not be touched");

    // Exactly one invocation row, tier free, success.
    let rows = h.store.list_invocations_by_task(h.ctx.task_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tier, ToolTier::Free);
    assert_eq!(rows[0].outcome, InvocationOutcome::Success);
}

#[tokio::test]
async fn test_waterfall_escalates_on_insufficient_results() {
    let free = Arc::new(
        ScriptedTool::new("free_search", ToolTier::Free, &["web_search"])
            .with_result(serde_json::json!([{"url": "a"}, {"url": "b"}])),
    );
    let paid = Arc::new(
        ScriptedTool::new("paid_search", ToolTier::Cheap, &["web_search"]).with_result(
            serde_json::json!([{"url": "b"}, {"url": "c"}, {"url": "d"}, {"url": "e"}]),
        ),
    );
    let h = harness(
        &[Arc::clone(&free), Arc::clone(&paid)],
        vec![OpPolicy::waterfall("web_search", 5).with_dedupe_field("url")],
        BreakerSection::default(),
        10.0,
    )
    .await;

    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("web_search", serde_json::json!({"q": "x"})))
        .await;

    // Merged across tiers, deduped by url: a b c d e.
    let value = outcome.result.unwrap();
    assert_eq!(results(&value), 5);
    assert_eq!(free.calls(), 1);
    assert_eq!(paid.calls(), 1);
}

#[tokio::test]
async fn test_waterfall_exhaustion_is_composite_error() {
    let free = Arc::new(
        ScriptedTool::new("free_search", ToolTier::Free, &["web_search"])
            .with_result(serde_json::json!([{"url": "a"}])),
    );
    let h = harness(
        &[Arc::clone(&free)],
        vec![OpPolicy::waterfall("web_search", 5)],
        BreakerSection::default(),
        10.0,
    )
    .await;

    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("web_search", serde_json::json!({"q": "x"})))
        .await;

    let failure = outcome.result.unwrap_err();
    assert!(failure.message.contains("exhausted"));
}

#[tokio::test]
async fn test_coverage_keeps_partial_results() {
    let free = Arc::new(
        ScriptedTool::new("free_search", ToolTier::Free, &["lead_search"])
            .with_result(serde_json::json!([{"email": "a@x.io"}, {"email": "b@x.io"}])),
    );
    let h = harness(
        &[Arc::clone(&free)],
        vec![OpPolicy::coverage("lead_search", 10).with_dedupe_field("email")],
        BreakerSection::default(),
        10.0,
    )
    .await;

    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("lead_search", serde_json::json!({"icp": "x"})))
        .await;

    let value = outcome.result.unwrap();
    assert_eq!(results(&value), 2, "coverage mode returns what it gathered");
}

#[tokio::test]
async fn test_fanout_merges_and_maps_errors() {
    let good = Arc::new(
        ScriptedTool::new("good", ToolTier::Free, &["email_verify"])
            .with_result(serde_json::json!([{"email": "a@x.io", "status": "valid"}])),
    );
    let bad = Arc::new(
        ScriptedTool::new("bad", ToolTier::Free, &["email_verify"])
            .push_err(ToolError::Server {
                status: 500,
                message: "upstream".to_string(),
            }),
    );
    let h = harness(
        &[Arc::clone(&good), Arc::clone(&bad)],
        vec![OpPolicy::fanout("email_verify", 2).with_dedupe_field("email")],
        BreakerSection::default(),
        10.0,
    )
    .await;

    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("email_verify", serde_json::json!({"batch": 1})))
        .await;

    let value = outcome.result.unwrap();
    assert_eq!(results(&value), 1);
    assert!(outcome.source_errors.contains_key("bad"));
    assert!(!outcome.source_errors.contains_key("good"));
}

#[tokio::test]
async fn test_single_flight_dedupes_concurrent_identical_requests() {
    let slow = Arc::new(
        ScriptedTool::new("slow", ToolTier::Free, &["web_search"])
            .with_delay(Duration::from_millis(80))
            .with_result(serde_json::json!([1, 2, 3])),
    );
    let h = harness(
        &[Arc::clone(&slow)],
        vec![OpPolicy::waterfall("web_search", 1)],
        BreakerSection::default(),
        10.0,
    )
    .await;

    let request = ToolRequest::new("web_search", serde_json::json!({"q": "same"}));
    let (a, b) = tokio::join!(
        h.router.dispatch(&h.ctx, &request),
        h.router.dispatch(&h.ctx, &request),
    );

    assert_eq!(a.result.unwrap(), serde_json::json!([1, 2, 3]));
    assert_eq!(b.result.unwrap(), serde_json::json!([1, 2, 3]));
    assert_eq!(slow.calls(), 1, "concurrent identical requests share one invocation");

    // A later identical request is served from the cache.
    let c = h.router.dispatch(&h.ctx, &request).await;
    assert!(c.result.is_ok());
    assert_eq!(slow.calls(), 1);
}

#[tokio::test]
async fn test_budget_denied_stops_escalation() {
    let pricey = Arc::new(
        ScriptedTool::new("pricey", ToolTier::Expensive, &["enrich"])
            .with_cost(5.0)
            .with_result(serde_json::json!([{"role": "vp"}])),
    );
    let h = harness(
        &[Arc::clone(&pricey)],
        vec![OpPolicy::waterfall("enrich", 1)],
        BreakerSection::default(),
        1.0,
    )
    .await;

    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("enrich", serde_json::json!({"batch": 1})))
        .await;

    let failure = outcome.result.unwrap_err();
    assert_eq!(failure.class, ErrorClass::BudgetDenied);
    assert_eq!(pricey.calls(), 0, "denied before the tool is touched");

    let rows = h.store.list_invocations_by_task(h.ctx.task_id).await.unwrap();
    assert_eq!(rows[0].outcome, InvocationOutcome::BudgetDenied);
}

#[tokio::test]
async fn test_breaker_trips_and_surfaces_circuit_open() {
    let flaky = Arc::new(
        ScriptedTool::new("flaky", ToolTier::Free, &["web_search"])
            .push_err(ToolError::Timeout(Duration::from_millis(1)))
            .push_err(ToolError::Timeout(Duration::from_millis(1)))
            .push_err(ToolError::Timeout(Duration::from_millis(1)))
            .with_result(serde_json::json!([1])),
    );
    let mut breakers = BreakerSection::default();
    breakers.default.failure_threshold = 3;
    breakers.default.timeout_ms = 60_000;

    let h = harness(
        &[Arc::clone(&flaky)],
        vec![OpPolicy::waterfall("web_search", 1)],
        breakers,
        10.0,
    )
    .await;

    // Three transient failures trip the breaker. Params differ so the
    // single-flight cache does not interfere.
    for i in 0..3 {
        let outcome = h
            .router
            .dispatch(&h.ctx, &ToolRequest::new("web_search", serde_json::json!({"q": i})))
            .await;
        assert!(outcome.result.is_err());
    }
    assert_eq!(h.breakers.state("flaky").await, Some(CircuitState::Open));

    // Next call is rejected without touching the tool.
    let calls_before = flaky.calls();
    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("web_search", serde_json::json!({"q": 99})))
        .await;
    let failure = outcome.result.unwrap_err();
    assert_eq!(failure.class, ErrorClass::CircuitOpen);
    assert_eq!(flaky.calls(), calls_before);
}

#[tokio::test]
async fn test_rate_limited_tool_reports_retry_after() {
    let limited = Arc::new(
        ScriptedTool::new("limited", ToolTier::Free, &["web_search"]).push_err(
            ToolError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            },
        ),
    );
    let h = harness(
        &[Arc::clone(&limited)],
        vec![OpPolicy::waterfall("web_search", 1)],
        BreakerSection::default(),
        10.0,
    )
    .await;

    let outcome = h
        .router
        .dispatch(&h.ctx, &ToolRequest::new("web_search", serde_json::json!({"q": "x"})))
        .await;

    let failure = outcome.result.unwrap_err();
    assert_eq!(failure.class, ErrorClass::RateLimited);
    assert_eq!(failure.retry_after_ms, Some(2_000));

    let rows = h.store.list_invocations_by_task(h.ctx.task_id).await.unwrap();
    assert_eq!(rows[0].outcome, InvocationOutcome::RateLimited);
}
