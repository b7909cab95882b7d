//! Eventstream binary.
//!
//! Entry point for the sync daemon: loads configuration, wires the
//! upstream client, store and orchestrator, then either runs the startup
//! policy plus the hourly scheduler, or executes a one-shot year
//! backfill. Serving the query façade over HTTP is left to an embedding
//! server.

use clap::{Parser, Subcommand};
use eventstream_core::config::{Args, ServiceConfig};
use eventstream_core::{DuckDbStore, Error, SyncOrchestrator, UpstreamClient};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: Args,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Re-sync one calendar year end-to-end with rate-limit-friendly pacing
    Backfill {
        #[arg(long)]
        year: i32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eventstream_core=info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::load(&cli.args)?;

    let store = Arc::new(DuckDbStore::new(&config.storage.database)?);
    let client = Arc::new(UpstreamClient::new(
        &config.upstream.base_url,
        config.get_credentials(),
        config.upstream_timeout(),
    )?);
    let orchestrator = Arc::new(SyncOrchestrator::new(
        client,
        store.clone(),
        config.sync_settings(),
    ));

    match cli.command {
        Some(Command::Backfill { year }) => {
            let report = orchestrator.backfill_year(year).await?;
            println!(
                "Backfilled {}: {} occurrences, {} samples",
                year, report.occurrences, report.samples
            );
        }
        None => {
            info!("Eventstream starting up");
            match orchestrator.run_startup().await {
                Ok(Some(report)) => info!(
                    occurrences = report.occurrences,
                    samples = report.samples,
                    "Startup sync finished"
                ),
                Ok(None) => {}
                Err(err @ Error::Authentication(_)) => return Err(err.into()),
                Err(err) => error!(error = %err, "Startup sync failed"),
            }

            let scheduler = orchestrator.clone().spawn_scheduler();
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            scheduler.abort();
        }
    }

    Ok(())
}
