//! Demo wiring: a scripted end-to-end pipeline.
//!
//! Registers a deterministic agent for every pipeline slot and a small
//! tool fleet across the cost tiers, so `cadence demo` can exercise the
//! whole orchestrator without external services.

use serde_json::json;
use std::sync::Arc;

use crate::domain::models::ToolTier;
use crate::domain::ports::{ToolRequest, WaitPolicy};
use crate::infrastructure::setup::OrchestratorBuilder;
use crate::services::tool_router::OpPolicy;

use super::scripted::{ScriptedAgent, ScriptedTool};

/// Register demo agents, tools, and routing policies on a builder.
pub fn register_demo_pipeline(mut builder: OrchestratorBuilder) -> OrchestratorBuilder {
    // Tools, one or two per tier.
    builder = builder
        .register_tool(Arc::new(
            ScriptedTool::new("ddg", ToolTier::Free, &["web_search"]).with_result(json!([
                {"url": "https://example.com/a", "title": "SaaS outreach trends"},
                {"url": "https://example.com/b", "title": "Vertical research"},
            ])),
        ))
        .register_tool(Arc::new(
            ScriptedTool::new("serper", ToolTier::Cheap, &["web_search"]).with_result(json!([
                {"url": "https://example.com/b", "title": "Vertical research"},
                {"url": "https://example.com/c", "title": "ICP playbook"},
                {"url": "https://example.com/d", "title": "Persona deep dive"},
            ])),
        ))
        .register_tool(Arc::new(
            ScriptedTool::new("apollo", ToolTier::Cheap, &["lead_search"]).with_result(json!([
                {"email": "ana@acme.io", "company": "Acme"},
                {"email": "bo@umbrella.co", "company": "Umbrella"},
                {"email": "cy@initech.dev", "company": "Initech"},
            ])),
        ))
        .register_tool(Arc::new(
            ScriptedTool::new("zerobounce", ToolTier::Moderate, &["email_verify"])
                .with_result(json!([{"email": "ana@acme.io", "status": "valid"}])),
        ))
        .register_tool(Arc::new(
            ScriptedTool::new("clearbit", ToolTier::Expensive, &["enrich"])
                .with_result(json!([{"email": "ana@acme.io", "role": "VP Sales", "size": 120}])),
        ))
        .register_tool(Arc::new(
            ScriptedTool::new("sendgrid", ToolTier::Cheap, &["email_send"])
                .with_result(json!([{"queued": 3}])),
        ))
        .register_tool(Arc::new(
            ScriptedTool::new("poststats", ToolTier::Free, &["campaign_stats"])
                .with_result(json!([{"opens": 0, "replies": 0}])),
        ));

    // Routing policies per abstract op.
    builder = builder
        .with_policy(OpPolicy::waterfall("web_search", 3).with_dedupe_field("url"))
        .with_policy(OpPolicy::coverage("lead_search", 3).with_dedupe_field("email"))
        .with_policy(OpPolicy::fanout("email_verify", 2).with_dedupe_field("email"))
        .with_policy(OpPolicy::waterfall("enrich", 1))
        .with_policy(OpPolicy::waterfall("email_send", 1))
        .with_policy(OpPolicy::waterfall("campaign_stats", 1));

    // Phase 1: market intelligence.
    builder = builder
        .register_agent(Arc::new(
            ScriptedAgent::new("niche_research")
                .with_requests(
                    vec![ToolRequest::new("web_search", json!({"q": "niche trends"}))],
                    WaitPolicy::All,
                )
                .with_checkpoint_rounds(1),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("persona_research").with_requests(
                vec![ToolRequest::new("web_search", json!({"q": "buyer personas"}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("research_export")
                .with_output(json!({"personas": 3, "niches": 2, "quality_score": 0.9})),
        ));

    // Phase 2: lead acquisition.
    builder = builder
        .register_agent(Arc::new(
            ScriptedAgent::new("list_builder").with_requests(
                vec![ToolRequest::new("lead_search", json!({"icp": "b2b saas"}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(ScriptedAgent::new("validation")))
        .register_agent(Arc::new(ScriptedAgent::new("within_dedup")))
        .register_agent(Arc::new(ScriptedAgent::new("cross_campaign_dedup")))
        .register_agent(Arc::new(ScriptedAgent::new("scoring").with_checkpoint_rounds(1)))
        .register_agent(Arc::new(
            ScriptedAgent::new("import_finalizer").with_output(json!({"leads": 3, "quality_score": 0.85})),
        ));

    // Phase 3: verification.
    builder = builder
        .register_agent(Arc::new(
            ScriptedAgent::new("email_verification").with_requests(
                vec![ToolRequest::new("email_verify", json!({"batch": 1}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("enrichment").with_requests(
                vec![ToolRequest::new("enrich", json!({"batch": 1}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("verification_finalizer")
                .with_output(json!({"verified": 3, "quality_score": 0.92})),
        ));

    // Phase 4: personalization.
    builder = builder
        .register_agent(Arc::new(
            ScriptedAgent::new("company_research").with_requests(
                vec![ToolRequest::new("web_search", json!({"q": "company news"}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("lead_research").with_requests(
                vec![ToolRequest::new("web_search", json!({"q": "lead background"}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("email_generation").with_checkpoint_rounds(2),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("personalization_finalizer")
                .with_output(json!({"drafts": 3, "quality_score": 0.88})),
        ));

    // Phase 5: execution.
    builder = builder
        .register_agent(Arc::new(ScriptedAgent::new("campaign_setup")))
        .register_agent(Arc::new(
            ScriptedAgent::new("sending").with_requests(
                vec![ToolRequest::new("email_send", json!({"campaign": "demo"}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("reply_monitoring").with_requests(
                vec![ToolRequest::new("campaign_stats", json!({"window": "1h"}))],
                WaitPolicy::All,
            ),
        ))
        .register_agent(Arc::new(
            ScriptedAgent::new("analytics").with_requests(
                vec![ToolRequest::new("campaign_stats", json!({"window": "24h"}))],
                WaitPolicy::All,
            ),
        ));

    builder
}
