//! Scripted in-memory replication source for tests and development.
//!
//! A [`MemoryConnector`] serves a fixed binlog index and a sequence of
//! connection segments. Each call to `start_replication` consumes the next
//! segment, so scripts can express disconnect-and-reconnect scenarios; the
//! requested start positions are recorded for inspection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};
use crate::source::{ReplicationConnector, ReplicationStream};
use crate::types::{Event, GtidList};

/// One scripted element of a connection segment.
#[derive(Debug, Clone)]
pub enum ScriptedItem {
    /// Deliver this event.
    Event(Event),
    /// Fail the fetch with a transient connection-lost error.
    NetworkLoss,
    /// End the stream cleanly.
    EndOfStream,
}

#[derive(Debug, Default)]
struct ConnectorInner {
    binlogs: Vec<(String, GtidList)>,
    segments: VecDeque<Vec<ScriptedItem>>,
    start_positions: Vec<GtidList>,
}

/// Scripted [`ReplicationConnector`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<ConnectorInner>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a binlog and its starting GTID position. Binlogs are
    /// reported in registration order, oldest first.
    pub fn with_binlog(self, name: &str, start: GtidList) -> Self {
        self.inner
            .lock()
            .unwrap()
            .binlogs
            .push((name.to_owned(), start));
        self
    }

    /// Appends a connection segment. The first `start_replication` call
    /// serves the first segment, and so on.
    pub fn with_segment(self, items: Vec<ScriptedItem>) -> Self {
        self.inner.lock().unwrap().segments.push_back(items);
        self
    }

    /// Returns the start positions requested by each connection attempt.
    pub fn start_positions(&self) -> Vec<GtidList> {
        self.inner.lock().unwrap().start_positions.clone()
    }
}

impl ReplicationConnector for MemoryConnector {
    type Stream = MemoryStream;

    async fn list_binlogs(&self) -> CdcResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .binlogs
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn gtid_pos_at(&self, binlog: &str) -> CdcResult<GtidList> {
        self.inner
            .lock()
            .unwrap()
            .binlogs
            .iter()
            .find(|(name, _)| name == binlog)
            .map(|(_, start)| start.clone())
            .ok_or_else(|| {
                cdc_error!(
                    ErrorKind::QueryFailed,
                    "unknown binlog",
                    binlog.to_owned()
                )
            })
    }

    async fn start_replication(&self, start: &GtidList) -> CdcResult<Self::Stream> {
        let mut inner = self.inner.lock().unwrap();
        inner.start_positions.push(start.clone());

        let Some(items) = inner.segments.pop_front() else {
            return Err(cdc_error!(
                ErrorKind::ConnectionFailed,
                "no scripted segments remain"
            ));
        };

        Ok(MemoryStream {
            items: items.into(),
        })
    }
}

/// Stream side of a [`MemoryConnector`] segment.
///
/// Once the segment is exhausted the stream stays open and pends forever,
/// mimicking an idle upstream; shutdown interrupts the pending fetch.
#[derive(Debug)]
pub struct MemoryStream {
    items: VecDeque<ScriptedItem>,
}

impl ReplicationStream for MemoryStream {
    async fn fetch_event(&mut self) -> CdcResult<Option<Event>> {
        match self.items.pop_front() {
            Some(ScriptedItem::Event(event)) => Ok(Some(event)),
            Some(ScriptedItem::NetworkLoss) => Err(cdc_error!(
                ErrorKind::ConnectionLost,
                "scripted network loss"
            )),
            Some(ScriptedItem::EndOfStream) => Ok(None),
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventData, XidEvent};

    fn xid() -> Event {
        Event::new(1, EventData::Xid(XidEvent { transaction_nr: 1 }))
    }

    #[tokio::test]
    async fn segments_are_served_in_order() {
        let connector = MemoryConnector::new()
            .with_segment(vec![ScriptedItem::Event(xid()), ScriptedItem::NetworkLoss])
            .with_segment(vec![ScriptedItem::EndOfStream]);

        let mut first = connector
            .start_replication(&GtidList::default())
            .await
            .unwrap();
        assert!(first.fetch_event().await.unwrap().is_some());
        let err = first.fetch_event().await.unwrap_err();
        assert!(err.is_transient());

        let mut second = connector
            .start_replication(&GtidList::default())
            .await
            .unwrap();
        assert!(second.fetch_event().await.unwrap().is_none());

        assert!(connector
            .start_replication(&GtidList::default())
            .await
            .is_err());
        assert_eq!(connector.start_positions().len(), 3);
    }

    #[tokio::test]
    async fn binlog_index_is_queryable() {
        let connector = MemoryConnector::new()
            .with_binlog("bin.000001", GtidList::default())
            .with_binlog("bin.000002", "0-1-10".parse().unwrap());

        let binlogs = connector.list_binlogs().await.unwrap();
        assert_eq!(binlogs, vec!["bin.000001", "bin.000002"]);
        assert_eq!(
            connector.gtid_pos_at("bin.000002").await.unwrap(),
            "0-1-10".parse().unwrap()
        );
        assert!(connector.gtid_pos_at("bin.000404").await.is_err());
    }
}
