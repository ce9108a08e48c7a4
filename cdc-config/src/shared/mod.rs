mod connection;
mod replicator;

pub use connection::{ColumnStoreConfig, MariadbConfig};
pub use replicator::{CheckpointConfig, ReplicatorConfig};
