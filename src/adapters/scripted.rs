//! Table-driven tool and agent implementations.
//!
//! Deterministic stand-ins for real API adapters and LLM-backed agents,
//! used by the integration tests and the `demo` command. A scripted tool
//! serves a queue of outcomes then falls back to a fixed result; a
//! scripted agent walks request -> checkpoint -> done and records its
//! compensation calls in a shared log.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::ToolTier;
use crate::domain::ports::{
    AgentLogic, StepContext, StepOutcome, ToolAdapter, ToolCallResult, ToolError, ToolOutput,
    ToolRequest, WaitPolicy,
};

/// A deterministic tool adapter.
pub struct ScriptedTool {
    tool_id: String,
    tier: ToolTier,
    ops: Vec<String>,
    cost_usd: f64,
    idempotent: bool,
    delay: Option<Duration>,
    /// Queued outcomes consumed call by call.
    script: Mutex<VecDeque<Result<serde_json::Value, ToolError>>>,
    /// Fallback result once the script is exhausted.
    fallback: Option<serde_json::Value>,
    calls: AtomicU32,
}

impl ScriptedTool {
    pub fn new(tool_id: impl Into<String>, tier: ToolTier, ops: &[&str]) -> Self {
        Self {
            tool_id: tool_id.into(),
            tier,
            ops: ops.iter().map(|s| (*s).to_string()).collect(),
            cost_usd: match tier {
                ToolTier::Free => 0.0,
                ToolTier::Cheap => 0.001,
                ToolTier::Moderate => 0.005,
                ToolTier::Expensive => 0.01,
            },
            idempotent: true,
            delay: None,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fixed result returned once the script queue is exhausted.
    pub fn with_result(mut self, value: serde_json::Value) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    /// Queue one outcome ahead of the fallback.
    pub fn push_ok(self, value: serde_json::Value) -> Self {
        self.script.lock().expect("script lock").push_back(Ok(value));
        self
    }

    /// Queue one failure ahead of the fallback.
    pub fn push_err(self, err: ToolError) -> Self {
        self.script.lock().expect("script lock").push_back(Err(err));
        self
    }

    /// Total invocations served.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolAdapter for ScriptedTool {
    fn tool_id(&self) -> &str {
        &self.tool_id
    }

    fn tier(&self) -> ToolTier {
        self.tier
    }

    fn ops(&self) -> Vec<String> {
        self.ops.clone()
    }

    fn idempotent(&self) -> bool {
        self.idempotent
    }

    fn estimate_cost_usd(&self, _op: &str) -> f64 {
        self.cost_usd
    }

    async fn invoke(&self, op: &str, _params: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().expect("script lock").pop_front();
        match scripted {
            Some(Ok(value)) => Ok(ToolOutput::new(value, self.cost_usd)),
            Some(Err(err)) => Err(err),
            None => match &self.fallback {
                Some(value) => Ok(ToolOutput::new(value.clone(), self.cost_usd)),
                None => Err(ToolError::NotFound(format!(
                    "no scripted result for {}::{op}",
                    self.tool_id
                ))),
            },
        }
    }
}

/// Shared log of compensation calls, for asserting saga order.
pub type CompensationLog = Arc<Mutex<Vec<String>>>;

/// A deterministic agent.
pub struct ScriptedAgent {
    name: String,
    requests: Vec<ToolRequest>,
    wait: WaitPolicy,
    checkpoint_rounds: u64,
    output: Option<serde_json::Value>,
    abort_reason: Option<String>,
    required_input_field: Option<String>,
    compensation_log: Option<CompensationLog>,
    steps: AtomicU32,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: Vec::new(),
            wait: WaitPolicy::All,
            checkpoint_rounds: 0,
            output: None,
            abort_reason: None,
            required_input_field: None,
            compensation_log: None,
            steps: AtomicU32::new(0),
        }
    }

    /// Tool requests issued on the first step.
    pub fn with_requests(mut self, requests: Vec<ToolRequest>, wait: WaitPolicy) -> Self {
        self.requests = requests;
        self.wait = wait;
        self
    }

    /// Number of `CheckpointAndContinue` rounds before finishing.
    pub fn with_checkpoint_rounds(mut self, rounds: u64) -> Self {
        self.checkpoint_rounds = rounds;
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Abort on the first step instead of completing.
    pub fn aborting(mut self, reason: impl Into<String>) -> Self {
        self.abort_reason = Some(reason.into());
        self
    }

    /// Require a field in the task input; validation fails without it.
    pub fn requiring_input_field(mut self, field: impl Into<String>) -> Self {
        self.required_input_field = Some(field.into());
        self
    }

    pub fn with_compensation_log(mut self, log: CompensationLog) -> Self {
        self.compensation_log = Some(log);
        self
    }

    /// Total step invocations observed.
    pub fn steps_taken(&self) -> u32 {
        self.steps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentLogic for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_input(&self, input: &serde_json::Value) -> Result<(), String> {
        if let Some(field) = &self.required_input_field {
            if input.get(field).is_none() {
                return Err(format!("missing required input field '{field}'"));
            }
        }
        Ok(())
    }

    async fn step(
        &self,
        _ctx: &StepContext,
        state: &serde_json::Value,
        tool_results: &[ToolCallResult],
    ) -> DomainResult<StepOutcome> {
        self.steps.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = &self.abort_reason {
            return Ok(StepOutcome::Abort {
                reason: reason.clone(),
            });
        }

        let stage = state.get("stage").and_then(serde_json::Value::as_u64).unwrap_or(0);

        // First entry with tools to request and no results yet: suspend.
        if stage == 0 && !self.requests.is_empty() && tool_results.is_empty() {
            return Ok(StepOutcome::NeedsTools {
                requests: self.requests.clone(),
                wait: self.wait,
            });
        }

        // Fold tool payloads into state so the output reflects them.
        let gathered: Vec<serde_json::Value> = tool_results
            .iter()
            .filter_map(|r| r.result.as_ref().ok().cloned())
            .collect();

        if stage < self.checkpoint_rounds {
            let mut next = state.clone();
            if !next.is_object() {
                next = serde_json::json!({});
            }
            next["stage"] = serde_json::json!(stage + 1);
            if !gathered.is_empty() {
                next["gathered"] = serde_json::Value::Array(gathered);
            }
            return Ok(StepOutcome::CheckpointAndContinue { state: next });
        }

        let output = self.output.clone().unwrap_or_else(|| {
            serde_json::json!({
                "agent": self.name,
                "tool_results": gathered,
            })
        });
        Ok(StepOutcome::Done { output })
    }

    async fn compensate(&self, _ctx: &StepContext, _output: &serde_json::Value) -> DomainResult<()> {
        if let Some(log) = &self.compensation_log {
            log.lock().expect("compensation log lock").push(self.name.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_tool_queue_then_fallback() {
        let tool = ScriptedTool::new("serp", ToolTier::Free, &["web_search"])
            .push_err(ToolError::Timeout(Duration::from_secs(1)))
            .with_result(json!(["a"]));

        assert!(tool.invoke("web_search", &json!({})).await.is_err());
        let output = tool.invoke("web_search", &json!({})).await.unwrap();
        assert_eq!(output.value, json!(["a"]));
        assert_eq!(tool.calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_tool_without_result_fails() {
        let tool = ScriptedTool::new("serp", ToolTier::Free, &["web_search"]);
        assert!(tool.invoke("web_search", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_agent_flow() {
        let agent = ScriptedAgent::new("niche_research")
            .with_requests(vec![ToolRequest::new("web_search", json!({"q": "x"}))], WaitPolicy::All)
            .with_checkpoint_rounds(1);

        let ctx = StepContext {
            run_id: uuid::Uuid::new_v4(),
            task_id: uuid::Uuid::new_v4(),
            phase: crate::domain::models::Phase::MarketIntelligence,
            agent_name: "niche_research".to_string(),
            attempt: 1,
            cancel: tokio_util::sync::CancellationToken::new(),
        };

        // First step requests tools.
        let outcome = agent.step(&ctx, &json!({}), &[]).await.unwrap();
        assert!(matches!(outcome, StepOutcome::NeedsTools { .. }));

        // Re-entry with results checkpoints once.
        let results = vec![ToolCallResult {
            request_index: 0,
            result: Ok(json!(["r"])),
        }];
        let outcome = agent.step(&ctx, &json!({}), &results).await.unwrap();
        let StepOutcome::CheckpointAndContinue { state } = outcome else {
            panic!("expected checkpoint");
        };
        assert_eq!(state["stage"], json!(1));

        // Final step finishes.
        let outcome = agent.step(&ctx, &state, &[]).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Done { .. }));
    }

    #[test]
    fn test_input_validation() {
        let agent = ScriptedAgent::new("validation").requiring_input_field("leads");
        assert!(agent.validate_input(&json!({})).is_err());
        assert!(agent.validate_input(&json!({"leads": []})).is_ok());
    }
}
