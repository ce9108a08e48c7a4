use std::collections::HashSet;

use secrecy::SecretString;
use serde::Deserialize;

/// Default port of the MySQL protocol endpoints on both sides of the
/// replicator.
fn default_port() -> u16 {
    3306
}

/// Connection settings for the upstream MariaDB primary.
///
/// The `gtid` field is the optional resume position; a GTID persisted in the
/// checkpoint file always takes precedence over it. The `tables` field is a
/// comma-separated allowlist of `database.table` identifiers; when absent or
/// empty, every table is replicated.
#[derive(Debug, Clone, Deserialize)]
pub struct MariadbConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub server_id: u32,
    #[serde(default)]
    pub gtid: Option<String>,
    #[serde(default)]
    pub tables: Option<String>,
}

impl MariadbConfig {
    /// Returns the configured table allowlist as a set of `db.table` names.
    pub fn table_allowlist(&self) -> HashSet<String> {
        self.tables
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Connection settings for the downstream column store.
///
/// Statements and bulk batches are applied through the store's MySQL-protocol
/// frontend at `host:port`. The `xml` field locates the native bulk-load
/// configuration used by writer libraries that bypass the SQL frontend.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnStoreConfig {
    #[serde(default = "default_cs_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    #[serde(default)]
    pub xml: Option<String>,
}

fn default_cs_host() -> String {
    "127.0.0.1".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mariadb_config(tables: Option<&str>) -> MariadbConfig {
        MariadbConfig {
            host: "localhost".to_owned(),
            port: 3306,
            user: "repl".to_owned(),
            password: SecretString::from("secret"),
            server_id: 1234,
            gtid: None,
            tables: tables.map(str::to_owned),
        }
    }

    #[test]
    fn allowlist_splits_and_trims_entries() {
        let config = mariadb_config(Some("db.accounts, db.orders ,other.t1"));

        let allowlist = config.table_allowlist();

        assert_eq!(allowlist.len(), 3);
        assert!(allowlist.contains("db.accounts"));
        assert!(allowlist.contains("db.orders"));
        assert!(allowlist.contains("other.t1"));
    }

    #[test]
    fn allowlist_is_empty_when_unset_or_blank() {
        assert!(mariadb_config(None).table_allowlist().is_empty());
        assert!(mariadb_config(Some("")).table_allowlist().is_empty());
        assert!(mariadb_config(Some(" , ")).table_allowlist().is_empty());
    }
}
