//! CLI control plane for the cadence orchestrator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::models::{GateDecision, RunConfig};
use crate::infrastructure::setup::Orchestrator;
use crate::services::run_events::RunEvent;
use crate::services::workflow_engine::RunStatusReport;

#[derive(Parser)]
#[command(name = "cadence", version, about = "Agentic workflow orchestrator for cold-outreach pipelines")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow runs.
    #[command(subcommand)]
    Run(RunCommands),
    /// Manage human approval gates.
    #[command(subcommand)]
    Gate(GateCommands),
    /// Drive pending runs until interrupted.
    Serve,
    /// Execute one scripted demo run end to end.
    Demo {
        /// Budget cap for the demo run in USD.
        #[arg(long, default_value_t = 25.0)]
        budget: f64,
    },
}

#[derive(Subcommand)]
pub enum RunCommands {
    /// Create a new pending run.
    Start {
        /// Campaign name.
        #[arg(long)]
        name: String,
        /// Budget cap in USD.
        #[arg(long)]
        budget: f64,
        /// Seed input as inline JSON.
        #[arg(long, default_value = "{}")]
        input: String,
        /// Notification target (channel-specific address).
        #[arg(long)]
        notify: Option<String>,
    },
    /// Show run status, agents, spend, and pending gates.
    Status {
        run_id: Uuid,
    },
    /// Request cooperative cancellation.
    Cancel {
        run_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum GateCommands {
    /// Submit an approval decision.
    Decide {
        gate_id: Uuid,
        /// approved | rejected | revision_requested
        #[arg(long)]
        decision: String,
        #[arg(long, default_value = "cli")]
        approver: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

pub async fn handle_run_start(
    orchestrator: &Orchestrator,
    name: String,
    budget: f64,
    input: String,
    notify: Option<String>,
) -> Result<()> {
    let input: serde_json::Value = serde_json::from_str(&input).context("--input must be valid JSON")?;
    let run_id = orchestrator
        .engine
        .start_run(RunConfig {
            campaign_name: name,
            input,
            budget_cap_usd: budget,
            notification_target: notify,
        })
        .await?;
    println!("{run_id}");
    Ok(())
}

pub async fn handle_run_status(orchestrator: &Orchestrator, run_id: Uuid) -> Result<()> {
    let report = orchestrator.engine.get_status(run_id).await?;
    print_status(&report);
    Ok(())
}

pub async fn handle_run_cancel(orchestrator: &Orchestrator, run_id: Uuid) -> Result<()> {
    orchestrator.engine.cancel_run(run_id).await?;
    println!("cancellation requested for {run_id}");
    Ok(())
}

pub async fn handle_gate_decide(
    orchestrator: &Orchestrator,
    gate_id: Uuid,
    decision: &str,
    approver: &str,
    notes: Option<String>,
) -> Result<()> {
    let decision = GateDecision::from_str(decision)
        .with_context(|| format!("unknown decision '{decision}'"))?;
    let status = orchestrator
        .engine
        .submit_gate_decision(gate_id, decision, approver, notes)
        .await?;
    println!("gate {gate_id}: {status}");
    Ok(())
}

/// Drive pending runs until ctrl-c, then persist resilience snapshots.
pub async fn handle_serve(orchestrator: &Orchestrator) -> Result<()> {
    tracing::info!("serve loop started");
    loop {
        tokio::select! {
            result = orchestrator.engine.resume_active_runs() => {
                for (run_id, status) in result? {
                    tracing::info!(run_id = %run_id, status = %status, "run finished");
                }
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                orchestrator.shutdown().await?;
                return Ok(());
            }
        }
    }
}

/// Run the scripted demo pipeline end to end, echoing engine events.
pub async fn handle_demo(orchestrator: &Orchestrator, budget: f64) -> Result<()> {
    let mut events = orchestrator.engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            match envelope.event {
                RunEvent::PhaseStarted { phase, .. } => println!("phase {phase} started"),
                RunEvent::AgentStateChanged { agent_name, state, .. } => {
                    println!("  {agent_name}: {state}");
                }
                RunEvent::GateResolved { status, .. } => println!("gate resolved: {status}"),
                RunEvent::RunFinished { status, .. } => {
                    println!("run finished: {status}");
                    break;
                }
                _ => {}
            }
        }
    });

    let run_id = orchestrator
        .engine
        .start_run(RunConfig {
            campaign_name: "demo".to_string(),
            input: serde_json::json!({"niche": "b2b saas", "region": "EU"}),
            budget_cap_usd: budget,
            notification_target: None,
        })
        .await?;
    println!("started demo run {run_id}");

    let status = orchestrator.engine.run_to_completion(run_id).await?;
    printer.abort();

    let report = orchestrator.engine.get_status(run_id).await?;
    print_status(&report);
    println!("final status: {status}");
    Ok(())
}

fn print_status(report: &RunStatusReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["run", "phase", "status", "spend", "cap", "last error"]);
    table.add_row(vec![
        report.run.run_id.to_string(),
        report.run.phase.to_string(),
        report.run.status.to_string(),
        format!("{:.3}", report.spend_usd),
        format!("{:.2}", report.run.budget_cap_usd),
        report.run.last_error.clone().unwrap_or_default(),
    ]);
    println!("{table}");

    if !report.tasks.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["agent", "phase", "state", "attempt", "checkpoint", "error"]);
        for task in &report.tasks {
            table.add_row(vec![
                task.agent_name.clone(),
                task.phase.to_string(),
                task.state.to_string(),
                task.attempt.to_string(),
                task.checkpoint_version.to_string(),
                task.last_error.clone().unwrap_or_default(),
            ]);
        }
        println!("{table}");
    }

    for gate in &report.pending_gates {
        println!(
            "pending gate {} for phase {} (deadline {})",
            gate.gate_id, gate.phase, gate.deadline
        );
    }
}
