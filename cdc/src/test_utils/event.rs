//! Builders for the events a scripted upstream delivers.

use bytes::Bytes;

use crate::types::{
    Event, EventData, GtidEvent, QueryEvent, RowsEvent, RowsKind, TableMapEvent, XidEvent,
};

/// Server id used by every builder; tests rarely care about it.
pub const TEST_SERVER_ID: u32 = 1;

pub fn gtid(domain: u32, sequence: u64, flags: u8) -> Event {
    Event::new(
        TEST_SERVER_ID,
        EventData::Gtid(GtidEvent {
            domain_id: domain,
            sequence_nr: sequence,
            flags,
        }),
    )
}

pub fn xid(transaction_nr: u64) -> Event {
    Event::new(TEST_SERVER_ID, EventData::Xid(XidEvent { transaction_nr }))
}

pub fn table_map(table_id: u64, database: &str, table: &str) -> Event {
    Event::new(
        TEST_SERVER_ID,
        EventData::TableMap(TableMapEvent {
            table_id,
            database: database.to_owned(),
            table: table.to_owned(),
            column_types: Vec::new(),
            column_metadata: Bytes::new(),
        }),
    )
}

pub fn query(database: &str, statement: &str) -> Event {
    Event::new(
        TEST_SERVER_ID,
        EventData::Query(QueryEvent {
            database: database.to_owned(),
            statement: statement.to_owned(),
        }),
    )
}

/// A write-rows event with an opaque payload marker, enough for routing
/// tests against the memory destination.
pub fn write_rows(table_id: u64, marker: &str) -> Event {
    Event::new(
        TEST_SERVER_ID,
        EventData::WriteRows(RowsEvent {
            table_id,
            kind: RowsKind::Write,
            payload: Bytes::copy_from_slice(marker.as_bytes()),
        }),
    )
}

pub fn delete_rows(table_id: u64, marker: &str) -> Event {
    Event::new(
        TEST_SERVER_ID,
        EventData::DeleteRows(RowsEvent {
            table_id,
            kind: RowsKind::Delete,
            payload: Bytes::copy_from_slice(marker.as_bytes()),
        }),
    )
}
