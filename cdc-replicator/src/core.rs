use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::interval;
use tracing::info;

use cdc::classifier::SqlClassifier;
use cdc::destination::columnstore::{ColumnStoreDestination, ColumnStoreExecutor};
use cdc::replicator::{Replicator, ReplicatorSettings};
use cdc::source::mariadb::MariaDbConnector;
use cdc_config::shared::ReplicatorConfig;

/// How often the supervisor loop polls the replicator's health.
const HEALTH_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Wires the concrete source and destinations from the configuration and
/// runs the replicator until a signal arrives or the worker stops.
pub async fn run_replicator(config: ReplicatorConfig) -> anyhow::Result<()> {
    info!("starting replicator service");

    let resume_gtid = config
        .mariadb
        .gtid
        .as_deref()
        .filter(|gtid| !gtid.is_empty())
        .map(str::parse)
        .transpose()
        .context("parsing the configured resume gtid")?;

    let settings = ReplicatorSettings {
        resume_gtid,
        table_allowlist: config.mariadb.table_allowlist(),
        checkpoint_dir: config.checkpoint.dir.clone(),
    };

    let connector = MariaDbConnector::new(config.mariadb.clone());
    let destination = ColumnStoreDestination::new(&config.cs);
    let executor = ColumnStoreExecutor::new(&config.cs);

    let replicator = Replicator::start(
        settings,
        connector,
        destination,
        executor,
        Arc::new(SqlClassifier),
    );

    // Supervise until a termination signal arrives or the worker stops on
    // its own.
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut health = interval(HEALTH_POLL_PERIOD);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down");
                break;
            }
            _ = health.tick() => {
                if !replicator.ok() {
                    break;
                }
            }
        }
    }

    replicator.shutdown_and_wait().await?;
    info!("replicator service stopped");

    Ok(())
}
