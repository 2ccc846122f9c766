//! Backup Rotator - Main entry point
//!
//! Runs one rotation of database and file backups, locally and on S3.
//! Meant to be invoked once per day by an external scheduler.

use anyhow::{Context, Result};
use backup_rotator::{config::Config, orchestrator, remote::S3Store, retention::RunAnchor, utils};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config).context("Could not read config file.")?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let anchor = RunAnchor::today();
    tracing::info!(
        "Starting backup-rotator v{} (run date: {})",
        env!("CARGO_PKG_VERSION"),
        anchor.date()
    );

    let store = S3Store::new(&config.s3)?;

    if let Err(e) = orchestrator::run(&config, &store, anchor).await {
        tracing::error!("ERROR: {:#}", e);
        return Err(e);
    }

    Ok(())
}
