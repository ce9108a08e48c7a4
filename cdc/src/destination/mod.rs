//! Downstream contracts: per-table bulk writers and the statement executor.
//!
//! The replicator never talks to the column store directly; it drives these
//! traits and coordinates their commit boundaries. [`memory`] provides
//! in-memory implementations for tests and development, [`columnstore`] the
//! SQL-frontend implementations used by the service binary.

pub mod columnstore;
pub mod memory;
pub mod rows;

use std::future::Future;

use crate::error::CdcResult;
use crate::types::{QueryEvent, RowsEvent, TableMapEvent};

/// A bulk writer for one `(database, table)` pair.
///
/// Writers buffer row events into the current batch; the batch becomes
/// visible downstream only when [`TableWriter::commit`] succeeds. Enqueueing
/// the same uncommitted event again must not duplicate data once committed,
/// since a restart can replay the tail of an unacknowledged transaction.
pub trait TableWriter: Send {
    fn database(&self) -> &str;

    fn table(&self) -> &str;

    /// Appends a row-change event to the current batch.
    fn enqueue(&mut self, rows: RowsEvent) -> CdcResult<()>;

    /// Flushes the pending batch to the downstream store as one bulk
    /// operation.
    fn commit(&mut self) -> impl Future<Output = CdcResult<()>> + Send;

    /// Discards the pending batch. Never fails.
    fn rollback(&mut self) -> impl Future<Output = ()> + Send;
}

/// Factory for [`TableWriter`]s, driven by TABLE_MAP events.
///
/// A failure to open a writer is promoted to fatal by the replicator:
/// continuing without the writer would silently drop every row change for
/// that table.
pub trait Destination: Send + Sync + 'static {
    type Writer: TableWriter + Send + 'static;

    /// Creates a writer for the table described by `table_map`.
    fn open_table(
        &self,
        table_map: &TableMapEvent,
    ) -> impl Future<Output = CdcResult<Self::Writer>> + Send;
}

/// Applies replicated DDL/DML statements to the downstream store.
///
/// Implementations may run queued statements eagerly or lazily; the only
/// externally observable boundary is [`StatementExecutor::commit`].
pub trait StatementExecutor: Send + 'static {
    /// Queues a statement for application.
    fn enqueue(&mut self, query: QueryEvent) -> CdcResult<()>;

    /// Applies all queued statements and commits them as one transaction.
    fn commit(&mut self) -> impl Future<Output = CdcResult<()>> + Send;

    /// Discards queued statements and rolls back any open downstream
    /// transaction. Never fails.
    fn rollback(&mut self) -> impl Future<Output = ()> + Send;
}
