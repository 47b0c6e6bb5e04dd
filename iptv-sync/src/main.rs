mod cli;
mod daemon;
mod migrations;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use iptv_sync_core::bootstrap::{init_database, init_services, load_config};
use iptv_sync_core::logging;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(command = ?cli.command, "iptv-sync starting");

    // 3. Initialize database and services
    let pool = init_database(&config).await?;
    let services = init_services(&config, pool).await?;
    let engine = services.engine.clone();

    let success = match cli.command {
        Command::Sync => {
            let report = engine.run_full_sync().await?;
            print_json(&report)?;
            report.success
        }
        Command::SyncProvider { id } => {
            let report = engine.sync_provider(id).await?;
            print_json(&report)?;
            report.success
        }
        Command::Discover { id } => {
            let report = engine.discover_categories(id).await?;
            print_json(&report)?;
            report.success
        }
        Command::Progress { force } => {
            print_json(&engine.progress(force).await?)?;
            true
        }
        Command::Cancel => {
            let outcome = engine.request_cancel().await?;
            print_json(&serde_json::json!({ "outcome": outcome }))?;
            true
        }
        Command::Migrate => {
            migrations::run_migrations(&services.pool, services.store.clone()).await?;
            true
        }
        Command::Daemon => {
            migrations::run_migrations(&services.pool, services.store.clone()).await?;
            let shutdown = daemon::shutdown_on_ctrl_c();
            daemon::run(engine.clone(), config.sync.scheduler_tick(), shutdown).await?;
            true
        }
    };

    // progress writes still buffered
    engine.shutdown().await;
    services.pool.close().await;

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
