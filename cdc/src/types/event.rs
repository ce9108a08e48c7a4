use std::fmt;

use bytes::Bytes;

use crate::types::Gtid;

/// Flag set on a GTID event when the transaction consists of a single
/// statement that commits implicitly (DDL and similar).
pub const IMPLICIT_COMMIT_FLAG: u8 = 0x01;

/// Transaction start marker carrying the global transaction identifier.
///
/// The GTID itself combines the payload's domain and sequence number with the
/// `server_id` from the event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtidEvent {
    pub domain_id: u32,
    pub sequence_nr: u64,
    pub flags: u8,
}

impl GtidEvent {
    /// Returns true if the transaction announced by this event commits
    /// implicitly, without a terminating XID event.
    pub fn is_implicit_commit(&self) -> bool {
        self.flags & IMPLICIT_COMMIT_FLAG != 0
    }
}

/// End-of-transaction marker for multi-statement transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XidEvent {
    pub transaction_nr: u64,
}

/// Binds a session-scoped table id to a table and its column layout.
///
/// The upstream reassigns table ids freely, so a binding is only valid until
/// the next TABLE_MAP for the same id. Column types and metadata describe the
/// encoding of subsequent row events for this table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    pub column_types: Vec<u8>,
    pub column_metadata: Bytes,
}

/// A statement executed on the upstream, replicated verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub database: String,
    pub statement: String,
}

/// The kind of row change carried by a rows event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// A batch of row changes for a single table id.
///
/// The row images stay in their binlog encoding; decoding requires the
/// column layout from the most recent [`TableMapEvent`] for `table_id` and is
/// the table writer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsEvent {
    pub table_id: u64,
    pub kind: RowsKind,
    pub payload: Bytes,
}

/// Payload of a single replication event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    Gtid(GtidEvent),
    Xid(XidEvent),
    TableMap(TableMapEvent),
    Query(QueryEvent),
    WriteRows(RowsEvent),
    UpdateRows(RowsEvent),
    DeleteRows(RowsEvent),
    /// Any event type the replicator does not interpret (format description,
    /// rotate, heartbeat, ...).
    Other,
}

/// One record of the upstream binlog stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub server_id: u32,
    pub data: EventData,
}

impl Event {
    pub fn new(server_id: u32, data: EventData) -> Self {
        Self { server_id, data }
    }

    /// Returns the [`EventType`] that corresponds to this event.
    pub fn event_type(&self) -> EventType {
        self.into()
    }

    /// Returns the full GTID of a GTID event, combining the header's server
    /// id with the payload's domain and sequence.
    pub fn gtid(&self) -> Option<Gtid> {
        match &self.data {
            EventData::Gtid(gtid) => Some(Gtid::new(
                gtid.domain_id,
                self.server_id,
                gtid.sequence_nr,
            )),
            _ => None,
        }
    }
}

/// Lightweight classification of replication events, used for filtering and
/// routing decisions that do not need the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Gtid,
    Xid,
    TableMap,
    Query,
    WriteRows,
    UpdateRows,
    DeleteRows,
    Other,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gtid => write!(f, "Gtid"),
            Self::Xid => write!(f, "Xid"),
            Self::TableMap => write!(f, "TableMap"),
            Self::Query => write!(f, "Query"),
            Self::WriteRows => write!(f, "WriteRows"),
            Self::UpdateRows => write!(f, "UpdateRows"),
            Self::DeleteRows => write!(f, "DeleteRows"),
            Self::Other => write!(f, "Other"),
        }
    }
}

impl From<&Event> for EventType {
    fn from(event: &Event) -> Self {
        match &event.data {
            EventData::Gtid(_) => EventType::Gtid,
            EventData::Xid(_) => EventType::Xid,
            EventData::TableMap(_) => EventType::TableMap,
            EventData::Query(_) => EventType::Query,
            EventData::WriteRows(_) => EventType::WriteRows,
            EventData::UpdateRows(_) => EventType::UpdateRows,
            EventData::DeleteRows(_) => EventType::DeleteRows,
            EventData::Other => EventType::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gtid_combines_header_and_payload() {
        let event = Event::new(
            7,
            EventData::Gtid(GtidEvent {
                domain_id: 0,
                sequence_nr: 42,
                flags: 0,
            }),
        );

        assert_eq!(event.gtid(), Some(Gtid::new(0, 7, 42)));
        assert_eq!(event.event_type(), EventType::Gtid);
    }

    #[test]
    fn implicit_commit_flag_is_detected() {
        let implicit = GtidEvent {
            domain_id: 0,
            sequence_nr: 1,
            flags: IMPLICIT_COMMIT_FLAG,
        };
        let regular = GtidEvent {
            domain_id: 0,
            sequence_nr: 1,
            flags: 0,
        };

        assert!(implicit.is_implicit_commit());
        assert!(!regular.is_implicit_commit());
    }

    #[test]
    fn non_gtid_events_have_no_gtid() {
        let event = Event::new(7, EventData::Xid(XidEvent { transaction_nr: 1 }));

        assert_eq!(event.gtid(), None);
    }
}
