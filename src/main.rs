//! Cadence CLI entry point.

use anyhow::{Context, Result};
use cadence::adapters::demo::register_demo_pipeline;
use cadence::cli::{self, Cli, Commands, GateCommands, RunCommands};
use cadence::infrastructure::config::ConfigLoader;
use cadence::infrastructure::database::{
    all_embedded_migrations, create_pool, Migrator, SqliteStateStore,
};
use cadence::infrastructure::{logging, setup::Orchestrator};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    logging::init(&config.logging)?;

    // Durable store shared by every command.
    let database_url = format!("sqlite:{}", config.database.path);
    let pool = create_pool(&database_url, None)
        .await
        .context("Failed to open database")?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("Failed to run database migrations")?;
    let store = Arc::new(SqliteStateStore::new(pool));

    // The shipped binary wires the scripted demo pipeline; embedders
    // register real agents and tools through OrchestratorBuilder.
    let orchestrator = register_demo_pipeline(Orchestrator::builder(config).with_store(store))
        .build()
        .await?;

    match cli.command {
        Commands::Run(RunCommands::Start {
            name,
            budget,
            input,
            notify,
        }) => cli::handle_run_start(&orchestrator, name, budget, input, notify).await,
        Commands::Run(RunCommands::Status { run_id }) => {
            cli::handle_run_status(&orchestrator, run_id).await
        }
        Commands::Run(RunCommands::Cancel { run_id }) => {
            cli::handle_run_cancel(&orchestrator, run_id).await
        }
        Commands::Gate(GateCommands::Decide {
            gate_id,
            decision,
            approver,
            notes,
        }) => cli::handle_gate_decide(&orchestrator, gate_id, &decision, &approver, notes).await,
        Commands::Serve => cli::handle_serve(&orchestrator).await,
        Commands::Demo { budget } => cli::handle_demo(&orchestrator, budget).await,
    }
}
