//! Session-scoped routing of table ids to bulk writers.

use std::collections::HashMap;

use tracing::debug;

use crate::destination::TableWriter;
use crate::error::CdcResult;

/// Maps binlog table ids to their owned bulk writers.
///
/// The upstream reassigns table ids on every schema-relevant event, so the
/// map is write-dominant: a fresh TABLE_MAP replaces any existing writer at
/// that id, discarding the displaced writer's uncommitted batch.
pub struct TableRegistry<W> {
    writers: HashMap<u64, W>,
}

impl<W: TableWriter> TableRegistry<W> {
    pub fn new() -> Self {
        Self {
            writers: HashMap::new(),
        }
    }

    /// Installs `writer` at `table_id`, rolling back the batch of any writer
    /// previously bound to the same id.
    pub async fn insert(&mut self, table_id: u64, writer: W) {
        if let Some(mut displaced) = self.writers.insert(table_id, writer) {
            debug!(
                table_id,
                table = %format_args!("{}.{}", displaced.database(), displaced.table()),
                "table id rebound, discarding displaced writer's batch"
            );
            displaced.rollback().await;
        }
    }

    /// Returns the writer bound to `table_id`, if the table passed its
    /// TABLE_MAP filter.
    pub fn get_mut(&mut self, table_id: u64) -> Option<&mut W> {
        self.writers.get_mut(&table_id)
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    /// Commits every writer's pending batch, attempting all of them even
    /// after a failure. Returns the first error encountered.
    pub async fn commit_all(&mut self) -> CdcResult<()> {
        let mut result = Ok(());

        for writer in self.writers.values_mut() {
            if let Err(err) = writer.commit().await {
                tracing::error!(
                    table = %format_args!("{}.{}", writer.database(), writer.table()),
                    error = %err,
                    "table writer failed to commit"
                );
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }

    /// Rolls back every writer's pending batch.
    pub async fn rollback_all(&mut self) {
        for writer in self.writers.values_mut() {
            writer.rollback().await;
        }
    }
}

impl<W: TableWriter> Default for TableRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::destination::memory::MemoryDestination;
    use crate::destination::Destination;
    use crate::types::{RowsEvent, RowsKind, TableMapEvent};

    fn table_map(table_id: u64, table: &str) -> TableMapEvent {
        TableMapEvent {
            table_id,
            database: "db".to_owned(),
            table: table.to_owned(),
            column_types: vec![],
            column_metadata: Bytes::new(),
        }
    }

    fn rows(table_id: u64) -> RowsEvent {
        RowsEvent {
            table_id,
            kind: RowsKind::Write,
            payload: Bytes::from_static(b"row"),
        }
    }

    #[tokio::test]
    async fn rebinding_an_id_discards_the_displaced_batch() {
        let destination = MemoryDestination::new();
        let mut registry = TableRegistry::new();

        let mut first = destination.open_table(&table_map(10, "t1")).await.unwrap();
        first.enqueue(rows(10)).unwrap();
        registry.insert(10, first).await;

        let second = destination.open_table(&table_map(10, "t2")).await.unwrap();
        registry.insert(10, second).await;

        registry.commit_all().await.unwrap();

        // The displaced writer's pending row never reached the store.
        assert!(destination.committed_rows("db", "t1").is_empty());
    }

    #[tokio::test]
    async fn missing_ids_resolve_to_no_writer() {
        let mut registry: TableRegistry<
            <MemoryDestination as Destination>::Writer,
        > = TableRegistry::new();

        assert!(registry.get_mut(99).is_none());
        assert!(registry.is_empty());
    }
}
