use std::path::{Path, PathBuf};

use config::FileFormat;
use thiserror::Error;

use crate::shared::ReplicatorConfig;

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "CDC";

/// Separator between the environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables,
/// e.g. `CDC_MARIADB__HOST` overrides `mariadb.host`.
const ENV_SEPARATOR: &str = "__";

/// Errors that can occur while loading the replicator configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The configuration file does not exist at the given path.
    #[error("configuration file `{0}` does not exist")]
    MissingConfigurationFile(PathBuf),

    /// The file or environment overrides failed to merge.
    #[error("failed to read configuration sources")]
    Sources(#[source] config::ConfigError),

    /// The configuration sources were read but deserialization failed.
    #[error("failed to deserialize configuration")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads the replicator configuration from an INI file plus environment
/// variable overrides.
///
/// The file uses the `[mariadb]` / `[cs]` / `[checkpoint]` sections described
/// in [`ReplicatorConfig`]. Environment variables prefixed with `CDC_` and
/// using `__` as the section separator override file values, mirroring how
/// containerized deployments inject credentials.
pub fn load_config(path: &Path) -> Result<ReplicatorConfig, LoadConfigError> {
    if !path.is_file() {
        return Err(LoadConfigError::MissingConfigurationFile(
            path.to_path_buf(),
        ));
    }

    let environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(FileFormat::Ini))
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Sources)?;

    settings
        .try_deserialize::<ReplicatorConfig>()
        .map_err(LoadConfigError::Deserialization)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::*;

    const FULL_CONFIG: &str = r#"
[mariadb]
host=primary.example.com
port=3307
user=repl
password=replpw
server_id=1234
gtid=0-1-100
tables=db.accounts,db.orders

[cs]
host=cs.example.com
user=csuser
password=cspw
xml=/etc/columnstore/Columnstore.xml

[checkpoint]
dir=/var/lib/cdc
"#;

    const MINIMAL_CONFIG: &str = r#"
[mariadb]
host=127.0.0.1
user=repl
password=replpw
server_id=1

[cs]
user=csuser
password=cspw
"#;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("replicator.ini");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn full_config_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, FULL_CONFIG);

        let config = load_config(&path).unwrap();

        assert_eq!(config.mariadb.host, "primary.example.com");
        assert_eq!(config.mariadb.port, 3307);
        assert_eq!(config.mariadb.user, "repl");
        assert_eq!(config.mariadb.password.expose_secret(), "replpw");
        assert_eq!(config.mariadb.server_id, 1234);
        assert_eq!(config.mariadb.gtid.as_deref(), Some("0-1-100"));
        assert_eq!(config.mariadb.table_allowlist().len(), 2);
        assert_eq!(config.cs.host, "cs.example.com");
        assert_eq!(config.cs.port, 3306);
        assert_eq!(
            config.cs.xml.as_deref(),
            Some("/etc/columnstore/Columnstore.xml")
        );
        assert_eq!(config.checkpoint.dir, PathBuf::from("/var/lib/cdc"));
    }

    #[test]
    fn minimal_config_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, MINIMAL_CONFIG);

        let config = load_config(&path).unwrap();

        assert_eq!(config.mariadb.port, 3306);
        assert!(config.mariadb.gtid.is_none());
        assert!(config.mariadb.table_allowlist().is_empty());
        assert_eq!(config.cs.host, "127.0.0.1");
        assert!(config.cs.xml.is_none());
        assert_eq!(config.checkpoint.dir, PathBuf::from("."));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("does-not-exist.ini");

        let result = load_config(&path);

        assert!(matches!(
            result,
            Err(LoadConfigError::MissingConfigurationFile(_))
        ));
    }
}
