use std::path::Path;

use anyhow::Context;
use cdc_config::shared::ReplicatorConfig;
use tracing::debug;

/// Loads the service configuration and logs its non-secret parts.
pub fn load_replicator_config(path: &Path) -> anyhow::Result<ReplicatorConfig> {
    let config = cdc_config::load_config(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    log_config(&config);

    Ok(config)
}

fn log_config(config: &ReplicatorConfig) {
    debug!(
        host = %config.mariadb.host,
        port = config.mariadb.port,
        user = %config.mariadb.user,
        server_id = config.mariadb.server_id,
        gtid = ?config.mariadb.gtid,
        tables = config.mariadb.table_allowlist().len(),
        "upstream mariadb config"
    );
    debug!(
        host = %config.cs.host,
        port = config.cs.port,
        user = %config.cs.user,
        xml = ?config.cs.xml,
        "downstream column store config"
    );
    debug!(
        dir = %config.checkpoint.dir.display(),
        "checkpoint config"
    );
}
