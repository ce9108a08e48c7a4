//! Upstream replication source contract.
//!
//! The replicator core only depends on the two traits in this module. The
//! MariaDB wire implementation lives in [`mariadb`]; [`memory`] provides a
//! scripted source for tests and development.

pub mod mariadb;
pub mod memory;

use std::future::Future;

use crate::error::CdcResult;
use crate::types::{Event, GtidList};

/// Factory for replication channels to the upstream primary.
///
/// Besides opening the event stream, a connector answers the two catalog
/// queries the replicator needs to anchor a GTID resume: the list of
/// retained binlogs and the GTID position at the start of each of them.
pub trait ReplicationConnector: Send + Sync + 'static {
    type Stream: ReplicationStream + Send + 'static;

    /// Lists the binlog files currently retained by the upstream, oldest
    /// first.
    fn list_binlogs(&self) -> impl Future<Output = CdcResult<Vec<String>>> + Send;

    /// Returns the GTID position at the start of the given binlog file.
    /// Empty when no GTID events precede the file.
    fn gtid_pos_at(&self, binlog: &str) -> impl Future<Output = CdcResult<GtidList>> + Send;

    /// Opens a replication channel starting at `start`.
    ///
    /// Implementations must apply the session setup produced by
    /// [`session_setup`] before requesting the binlog dump, so that checksum
    /// handling, slave capabilities and strict GTID mode are negotiated
    /// consistently. An empty `start` list requests the upstream's current
    /// position.
    fn start_replication(
        &self,
        start: &GtidList,
    ) -> impl Future<Output = CdcResult<Self::Stream>> + Send;
}

/// An open replication channel delivering framed binlog events.
pub trait ReplicationStream: Send {
    /// Fetches the next event.
    ///
    /// Returns `Ok(None)` when the upstream terminates the stream. A dropped
    /// connection surfaces as an error whose kind is
    /// [`crate::error::ErrorKind::ConnectionLost`], which the replicator
    /// recovers from by reconnecting; any other error is fatal to the
    /// session.
    fn fetch_event(&mut self) -> impl Future<Output = CdcResult<Option<Event>>> + Send;
}

/// The fixed session setup issued before opening a replication channel.
///
/// The sequence mirrors what the upstream expects from a replica: checksum
/// pass-through, slave capability 4, the GTID connect position, strict GTID
/// mode, duplicate suppression and a stable character set.
pub fn session_setup(start: &GtidList) -> Vec<String> {
    vec![
        "SET @master_binlog_checksum = @@global.binlog_checksum".to_owned(),
        "SET @mariadb_slave_capability=4".to_owned(),
        format!("SET @slave_connect_state='{start}'"),
        "SET @slave_gtid_strict_mode=1".to_owned(),
        "SET @slave_gtid_ignore_duplicates=1".to_owned(),
        "SET NAMES latin1".to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Gtid;

    #[test]
    fn session_setup_embeds_the_start_position() {
        let start = GtidList::from(Gtid::new(0, 1, 100));

        let statements = session_setup(&start);

        assert_eq!(statements.len(), 6);
        assert_eq!(statements[2], "SET @slave_connect_state='0-1-100'");
        assert!(statements[3].contains("gtid_strict_mode=1"));
    }

    #[test]
    fn empty_start_position_connects_at_current() {
        let statements = session_setup(&GtidList::default());

        assert_eq!(statements[2], "SET @slave_connect_state=''");
    }
}
