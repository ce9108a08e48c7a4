use std::path::PathBuf;

use serde::Deserialize;

use crate::shared::{ColumnStoreConfig, MariadbConfig};

/// Top-level configuration of the replicator service.
///
/// Section names match the INI layout: `[mariadb]` for the upstream
/// primary, `[cs]` for the downstream column store and `[checkpoint]` for
/// the GTID state file.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    pub mariadb: MariadbConfig,
    pub cs: ColumnStoreConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Location of the durable GTID checkpoint.
///
/// Defaults to the working directory, but deployments should point this at a
/// stable path so the committed position survives process relocation.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".")
}
