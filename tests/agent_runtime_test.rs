//! Agent runtime integration tests: step loop, checkpointing, retry and
//! deferral classification, cancellation, and resume.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cadence::adapters::scripted::{ScriptedAgent, ScriptedTool};
use cadence::domain::errors::ErrorClass;
use cadence::domain::models::{
    AgentTask, BudgetConfig, Checkpoint, Phase, RateSection, TaskState, ToolTier,
};
use cadence::domain::ports::{LogNotifier, StateStore, ToolError, ToolRequest, WaitPolicy};
use cadence::infrastructure::database::MemoryStateStore;
use cadence::services::agent_runtime::{AgentRuntime, TaskOutcome};
use cadence::services::budget_governor::BudgetGovernor;
use cadence::services::circuit_breaker::CircuitBreakerRegistry;
use cadence::services::rate_limiter::RateLimiterRegistry;
use cadence::services::retry::RetryPolicy;
use cadence::services::run_events::RunEventBus;
use cadence::services::scheduler::Scheduler;
use cadence::services::tool_router::{OpPolicy, ToolRegistry, ToolRouter};

struct Harness {
    runtime: Arc<AgentRuntime>,
    store: Arc<MemoryStateStore>,
    run_id: Uuid,
}

async fn harness(tools: &[Arc<ScriptedTool>], policies: Vec<OpPolicy>, run_cap_usd: f64) -> Harness {
    let store = Arc::new(MemoryStateStore::new());
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
        Arc::new(CircuitBreakerRegistry::with_defaults()),
        Arc::new(RateLimiterRegistry::new(RateSection::default())),
        governor,
        Arc::clone(&store) as Arc<dyn StateStore>,
        Duration::from_secs(2),
    );
    for policy in policies {
        router.set_policy(policy);
    }

    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1_000),
        exponential_base: 2.0,
    };
    let runtime = Arc::new(AgentRuntime::new(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::new(router),
        Arc::new(Scheduler::with_defaults()),
        Arc::new(RunEventBus::default()),
        retry,
        Duration::from_millis(200),
        Duration::from_millis(10),
    ));

    Harness {
        runtime,
        store,
        run_id,
    }
}

fn make_task(run_id: Uuid, agent: &str) -> AgentTask {
    AgentTask::new(
        run_id,
        Phase::MarketIntelligence,
        agent,
        serde_json::json!({"campaign": {"niche": "saas"}}),
    )
}

async fn insert(h: &Harness, task: &AgentTask) {
    h.store.insert_task(task).await.unwrap();
}

#[tokio::test]
async fn test_happy_path_with_tools_and_checkpoints() {
    let tool = Arc::new(
        ScriptedTool::new("serp", ToolTier::Free, &["web_search"])
            .with_result(serde_json::json!(["r1", "r2"])),
    );
    let h = harness(&[tool], vec![OpPolicy::waterfall("web_search", 1)], 10.0).await;

    let agent = Arc::new(
        ScriptedAgent::new("niche_research")
            .with_requests(
                vec![ToolRequest::new("web_search", serde_json::json!({"q": "x"}))],
                WaitPolicy::All,
            )
            .with_checkpoint_rounds(2),
    );

    let task = make_task(h.run_id, "niche_research");
    let task_id = task.task_id;
    insert(&h, &task).await;

    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());

    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Completed);
    assert!(stored.output.is_some());

    // One checkpoint after the tool round plus two explicit rounds.
    let latest = h.store.latest_checkpoint(task_id).await.unwrap().unwrap();
    assert_eq!(latest.version, 3);
    assert_eq!(stored.checkpoint_version, 3);
}

#[tokio::test]
async fn test_transient_failure_retries_and_succeeds() {
    let tool = Arc::new(
        ScriptedTool::new("serp", ToolTier::Free, &["web_search"])
            .push_err(ToolError::Server {
                status: 503,
                message: "busy".to_string(),
            })
            .with_result(serde_json::json!(["ok"])),
    );
    let h = harness(&[Arc::clone(&tool)], vec![OpPolicy::waterfall("web_search", 1)], 10.0).await;

    let agent = Arc::new(ScriptedAgent::new("niche_research").with_requests(
        vec![ToolRequest::new("web_search", serde_json::json!({"q": "x"}))],
        WaitPolicy::All,
    ));

    let task = make_task(h.run_id, "niche_research");
    let task_id = task.task_id;
    insert(&h, &task).await;

    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(tool.calls(), 2);

    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.attempt, 2, "transient failure consumed one attempt");
}

#[tokio::test]
async fn test_retry_after_deferral_does_not_consume_attempt() {
    let tool = Arc::new(
        ScriptedTool::new("serp", ToolTier::Free, &["web_search"])
            .push_err(ToolError::RateLimited {
                retry_after: Some(Duration::from_millis(300)),
            })
            .with_result(serde_json::json!(["ok"])),
    );
    let h = harness(&[Arc::clone(&tool)], vec![OpPolicy::waterfall("web_search", 1)], 10.0).await;

    let agent = Arc::new(ScriptedAgent::new("niche_research").with_requests(
        vec![ToolRequest::new("web_search", serde_json::json!({"q": "x"}))],
        WaitPolicy::All,
    ));

    let task = make_task(h.run_id, "niche_research");
    let task_id = task.task_id;
    insert(&h, &task).await;

    let started = Instant::now();
    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert!(
        started.elapsed() >= Duration::from_millis(300),
        "Retry-After hint must be honored"
    );

    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.attempt, 1, "rate-limited deferral is not an attempt");
}

#[tokio::test]
async fn test_attempts_exhaust_to_failed() {
    let tool = Arc::new(
        ScriptedTool::new("serp", ToolTier::Free, &["web_search"])
            .push_err(ToolError::Timeout(Duration::from_millis(1)))
            .push_err(ToolError::Timeout(Duration::from_millis(1)))
            .push_err(ToolError::Timeout(Duration::from_millis(1)))
            .push_err(ToolError::Timeout(Duration::from_millis(1))),
    );
    let h = harness(&[tool], vec![OpPolicy::waterfall("web_search", 1)], 10.0).await;

    let agent = Arc::new(ScriptedAgent::new("niche_research").with_requests(
        vec![ToolRequest::new("web_search", serde_json::json!({"q": "x"}))],
        WaitPolicy::All,
    ));

    let task = make_task(h.run_id, "niche_research");
    let task_id = task.task_id;
    insert(&h, &task).await;

    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        TaskOutcome::Failed { class, .. } => assert_eq!(class, ErrorClass::Transient),
        other => panic!("expected failure, got {other:?}"),
    }

    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Failed);
}

#[tokio::test]
async fn test_abort_is_permanent() {
    let h = harness(&[], vec![], 10.0).await;
    let agent = Arc::new(ScriptedAgent::new("validation").aborting("schema mismatch"));

    let task = make_task(h.run_id, "validation");
    insert(&h, &task).await;

    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        TaskOutcome::Failed { class, reason } => {
            assert_eq!(class, ErrorClass::Permanent);
            assert!(reason.contains("schema mismatch"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_input_validation_fails_without_attempt() {
    let h = harness(&[], vec![], 10.0).await;
    let agent = Arc::new(ScriptedAgent::new("validation").requiring_input_field("leads"));

    let task = make_task(h.run_id, "validation");
    let task_id = task.task_id;
    insert(&h, &task).await;

    let outcome = h
        .runtime
        .run_task(task, agent.clone(), CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        TaskOutcome::Failed { class, .. } => assert_eq!(class, ErrorClass::Input),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(agent.steps_taken(), 0, "step never runs on invalid input");

    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Failed);
}

#[tokio::test]
async fn test_budget_denied_fails_task() {
    let pricey = Arc::new(
        ScriptedTool::new("pricey", ToolTier::Expensive, &["enrich"])
            .with_cost(50.0)
            .with_result(serde_json::json!([1])),
    );
    let h = harness(&[pricey], vec![OpPolicy::waterfall("enrich", 1)], 1.0).await;

    let agent = Arc::new(ScriptedAgent::new("enrichment").with_requests(
        vec![ToolRequest::new("enrich", serde_json::json!({"batch": 1}))],
        WaitPolicy::All,
    ));

    let task = make_task(h.run_id, "enrichment");
    insert(&h, &task).await;

    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        TaskOutcome::Failed { class, .. } => assert_eq!(class, ErrorClass::BudgetDenied),
        other => panic!("expected budget failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_during_suspension() {
    let slow = Arc::new(
        ScriptedTool::new("slow", ToolTier::Free, &["web_search"])
            .with_delay(Duration::from_millis(500))
            .with_result(serde_json::json!([1])),
    );
    let h = harness(&[slow], vec![OpPolicy::waterfall("web_search", 1)], 10.0).await;

    let agent = Arc::new(ScriptedAgent::new("niche_research").with_requests(
        vec![ToolRequest::new("web_search", serde_json::json!({"q": "x"}))],
        WaitPolicy::All,
    ));

    let task = make_task(h.run_id, "niche_research");
    let task_id = task.task_id;
    insert(&h, &task).await;

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let outcome = h.runtime.run_task(task, agent, cancel).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Cancelled));

    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Cancelled);
}

#[tokio::test]
async fn test_resume_from_checkpoint_skips_done_work() {
    let tool = Arc::new(
        ScriptedTool::new("serp", ToolTier::Free, &["web_search"])
            .with_result(serde_json::json!(["r"])),
    );
    let h = harness(&[Arc::clone(&tool)], vec![OpPolicy::waterfall("web_search", 1)], 10.0).await;

    // Agent requests tools only at stage 0; a checkpoint at stage 1 means
    // the tool round already happened before the interruption.
    let agent = Arc::new(
        ScriptedAgent::new("niche_research")
            .with_requests(
                vec![ToolRequest::new("web_search", serde_json::json!({"q": "x"}))],
                WaitPolicy::All,
            )
            .with_checkpoint_rounds(1),
    );

    let mut task = make_task(h.run_id, "niche_research");
    let task_id = task.task_id;
    task.checkpoint_version = 1;
    insert(&h, &task).await;
    h.store
        .put_checkpoint(&Checkpoint::from_state(task_id, 1, &serde_json::json!({"stage": 1})).unwrap())
        .await
        .unwrap();

    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(tool.calls(), 0, "resumed task replays from its checkpoint");

    // New checkpoints continue the version sequence.
    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert!(stored.checkpoint_version >= 1);
}

#[tokio::test]
async fn test_wait_any_presents_first_resolution() {
    let fast = Arc::new(
        ScriptedTool::new("fast", ToolTier::Free, &["fast_op"])
            .with_result(serde_json::json!(["fast"])),
    );
    let slow = Arc::new(
        ScriptedTool::new("slow", ToolTier::Free, &["slow_op"])
            .with_delay(Duration::from_millis(300))
            .with_result(serde_json::json!(["slow"])),
    );
    let h = harness(
        &[fast, slow],
        vec![OpPolicy::waterfall("fast_op", 1), OpPolicy::waterfall("slow_op", 1)],
        10.0,
    )
    .await;

    let agent = Arc::new(ScriptedAgent::new("niche_research").with_requests(
        vec![
            ToolRequest::new("slow_op", serde_json::json!({})),
            ToolRequest::new("fast_op", serde_json::json!({})),
        ],
        WaitPolicy::Any,
    ));

    let task = make_task(h.run_id, "niche_research");
    insert(&h, &task).await;

    let started = Instant::now();
    let outcome = h
        .runtime
        .run_task(task, agent, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "wait=any must not block on the slow request"
    );
}
