//! Replicator service binary.
//!
//! Consumes a MariaDB binlog stream and forwards row and statement changes
//! into the column store. Configuration comes from an INI file plus `CDC_`
//! environment overrides; SIGINT and SIGTERM trigger a graceful shutdown.

use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::load_replicator_config;
use crate::core::run_replicator;

mod config;
mod core;

/// MariaDB to column store change-data-capture replicator.
#[derive(Debug, Parser)]
#[command(name = "cdc-replicator")]
struct Args {
    /// Path to the INI configuration file.
    #[arg(default_value = "replicator.ini")]
    config: PathBuf,

    /// Resume GTID, overriding the configured one. A checkpointed position
    /// still takes precedence.
    #[arg(long)]
    gtid: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut replicator_config = load_replicator_config(&args.config)?;
    if args.gtid.is_some() {
        replicator_config.mariadb.gtid = args.gtid;
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_replicator(replicator_config));

    if let Err(err) = &result {
        error!(error = %err, "replicator terminated with an error");
    }

    result
}
