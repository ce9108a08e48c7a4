//! In-memory downstream implementations for testing and development.
//!
//! All state is process-local and lost on exit. Both participants can share
//! a [`Journal`] so tests can assert on the interleaving of enqueues and
//! commits across the whole downstream side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::cdc_error;
use crate::destination::{Destination, StatementExecutor, TableWriter};
use crate::error::{CdcResult, ErrorKind};
use crate::types::{QueryEvent, RowsEvent, TableMapEvent};

/// A downstream participant, as recorded in the [`Journal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    /// A bulk writer, identified by its `db.table` name.
    Writer(String),
    /// The statement executor.
    Executor,
}

/// One observed downstream operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    Enqueue,
    Commit,
    Rollback,
}

/// Shared, ordered record of downstream operations.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<(Participant, JournalOp)>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, participant: Participant, op: JournalOp) {
        self.0.lock().unwrap().push((participant, op));
    }

    /// Returns a snapshot of all recorded operations, in order.
    pub fn entries(&self) -> Vec<(Participant, JournalOp)> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug, Default)]
struct DestinationInner {
    committed: HashMap<(String, String), Vec<RowsEvent>>,
    open_failures: u32,
    commit_failures: u32,
}

/// In-memory [`Destination`] that keeps committed batches per table.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<DestinationInner>>,
    journal: Journal,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    /// Creates a destination recording into an externally owned journal,
    /// shared with a [`MemoryExecutor`] when cross-participant ordering
    /// matters.
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DestinationInner::default())),
            journal,
        }
    }

    /// Makes the next `open_table` call fail.
    pub fn fail_next_open(&self) {
        self.inner.lock().unwrap().open_failures += 1;
    }

    /// Makes the next writer commit fail.
    pub fn fail_next_commit(&self) {
        self.inner.lock().unwrap().commit_failures += 1;
    }

    /// Returns the rows committed for `db`.`table`, in commit order.
    pub fn committed_rows(&self, database: &str, table: &str) -> Vec<RowsEvent> {
        self.inner
            .lock()
            .unwrap()
            .committed
            .get(&(database.to_owned(), table.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Destination for MemoryDestination {
    type Writer = MemoryTableWriter;

    async fn open_table(&self, table_map: &TableMapEvent) -> CdcResult<Self::Writer> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.open_failures > 0 {
                inner.open_failures -= 1;
                return Err(cdc_error!(
                    ErrorKind::TableOpenFailed,
                    "memory destination refused to open table",
                    format!("{}.{}", table_map.database, table_map.table)
                ));
            }
        }

        Ok(MemoryTableWriter {
            database: table_map.database.clone(),
            table: table_map.table.clone(),
            pending: Vec::new(),
            inner: self.inner.clone(),
            journal: self.journal.clone(),
        })
    }
}

/// Writer handed out by [`MemoryDestination`].
#[derive(Debug)]
pub struct MemoryTableWriter {
    database: String,
    table: String,
    pending: Vec<RowsEvent>,
    inner: Arc<Mutex<DestinationInner>>,
    journal: Journal,
}

impl MemoryTableWriter {
    fn participant(&self) -> Participant {
        Participant::Writer(format!("{}.{}", self.database, self.table))
    }
}

impl TableWriter for MemoryTableWriter {
    fn database(&self) -> &str {
        &self.database
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn enqueue(&mut self, rows: RowsEvent) -> CdcResult<()> {
        // Replaying an event already sitting in the uncommitted batch must
        // not duplicate it.
        if !self.pending.contains(&rows) {
            self.pending.push(rows);
            self.journal.record(self.participant(), JournalOp::Enqueue);
        }
        Ok(())
    }

    async fn commit(&mut self) -> CdcResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.commit_failures > 0 {
                inner.commit_failures -= 1;
                return Err(cdc_error!(
                    ErrorKind::CommitFailed,
                    "memory destination refused to commit batch",
                    format!("{}.{}", self.database, self.table)
                ));
            }

            let key = (self.database.clone(), self.table.clone());
            let batch = std::mem::take(&mut self.pending);
            inner.committed.entry(key).or_default().extend(batch);
        }

        self.journal.record(self.participant(), JournalOp::Commit);
        Ok(())
    }

    async fn rollback(&mut self) {
        self.pending.clear();
        self.journal.record(self.participant(), JournalOp::Rollback);
    }
}

#[derive(Debug, Default)]
struct ExecutorInner {
    pending: Vec<QueryEvent>,
    applied: Vec<QueryEvent>,
    commit_failures: u32,
}

/// In-memory [`StatementExecutor`] that applies statements at commit time.
#[derive(Debug, Clone)]
pub struct MemoryExecutor {
    inner: Arc<Mutex<ExecutorInner>>,
    journal: Journal,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ExecutorInner::default())),
            journal,
        }
    }

    /// Makes the next executor commit fail.
    pub fn fail_next_commit(&self) {
        self.inner.lock().unwrap().commit_failures += 1;
    }

    /// Returns every statement applied by successful commits, in order.
    pub fn applied(&self) -> Vec<QueryEvent> {
        self.inner.lock().unwrap().applied.clone()
    }
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementExecutor for MemoryExecutor {
    fn enqueue(&mut self, query: QueryEvent) -> CdcResult<()> {
        info!(statement = %query.statement, "queueing statement");
        self.inner.lock().unwrap().pending.push(query);
        self.journal.record(Participant::Executor, JournalOp::Enqueue);
        Ok(())
    }

    async fn commit(&mut self) -> CdcResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.commit_failures > 0 {
                inner.commit_failures -= 1;
                return Err(cdc_error!(
                    ErrorKind::CommitFailed,
                    "memory executor refused to commit"
                ));
            }

            let batch = std::mem::take(&mut inner.pending);
            inner.applied.extend(batch);
        }

        self.journal.record(Participant::Executor, JournalOp::Commit);
        Ok(())
    }

    async fn rollback(&mut self) {
        self.inner.lock().unwrap().pending.clear();
        self.journal.record(Participant::Executor, JournalOp::Rollback);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::types::RowsKind;

    fn table_map() -> TableMapEvent {
        TableMapEvent {
            table_id: 10,
            database: "db".to_owned(),
            table: "t1".to_owned(),
            column_types: vec![],
            column_metadata: Bytes::new(),
        }
    }

    fn rows(marker: &'static [u8]) -> RowsEvent {
        RowsEvent {
            table_id: 10,
            kind: RowsKind::Write,
            payload: Bytes::from_static(marker),
        }
    }

    #[tokio::test]
    async fn writer_batches_become_visible_only_on_commit() {
        let destination = MemoryDestination::new();
        let mut writer = destination.open_table(&table_map()).await.unwrap();

        writer.enqueue(rows(b"a")).unwrap();
        assert!(destination.committed_rows("db", "t1").is_empty());

        writer.commit().await.unwrap();
        assert_eq!(destination.committed_rows("db", "t1").len(), 1);
    }

    #[tokio::test]
    async fn replayed_events_do_not_duplicate_within_a_batch() {
        let destination = MemoryDestination::new();
        let mut writer = destination.open_table(&table_map()).await.unwrap();

        writer.enqueue(rows(b"a")).unwrap();
        writer.enqueue(rows(b"a")).unwrap();
        writer.enqueue(rows(b"b")).unwrap();
        writer.commit().await.unwrap();

        assert_eq!(destination.committed_rows("db", "t1").len(), 2);
    }

    #[tokio::test]
    async fn rollback_discards_the_pending_batch() {
        let destination = MemoryDestination::new();
        let mut writer = destination.open_table(&table_map()).await.unwrap();

        writer.enqueue(rows(b"a")).unwrap();
        writer.rollback().await;
        writer.commit().await.unwrap();

        assert!(destination.committed_rows("db", "t1").is_empty());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let destination = MemoryDestination::new();
        destination.fail_next_open();

        assert!(destination.open_table(&table_map()).await.is_err());
        let mut writer = destination.open_table(&table_map()).await.unwrap();

        destination.fail_next_commit();
        writer.enqueue(rows(b"a")).unwrap();
        assert!(writer.commit().await.is_err());
        writer.commit().await.unwrap();

        assert_eq!(destination.committed_rows("db", "t1").len(), 1);
    }

    #[tokio::test]
    async fn executor_applies_statements_at_commit() {
        let mut executor = MemoryExecutor::new();
        executor
            .enqueue(QueryEvent {
                database: "db".to_owned(),
                statement: "CREATE TABLE t1 (id INT)".to_owned(),
            })
            .unwrap();

        assert!(executor.applied().is_empty());

        executor.commit().await.unwrap();
        assert_eq!(executor.applied().len(), 1);
    }

    #[tokio::test]
    async fn shared_journal_orders_cross_participant_operations() {
        let journal = Journal::new();
        let destination = MemoryDestination::with_journal(journal.clone());
        let mut executor = MemoryExecutor::with_journal(journal.clone());
        let mut writer = destination.open_table(&table_map()).await.unwrap();

        writer.enqueue(rows(b"a")).unwrap();
        writer.commit().await.unwrap();
        executor
            .enqueue(QueryEvent {
                database: "db".to_owned(),
                statement: "ALTER TABLE t2 ADD COLUMN x INT".to_owned(),
            })
            .unwrap();
        executor.commit().await.unwrap();

        let entries = journal.entries();
        assert_eq!(entries[0].1, JournalOp::Enqueue);
        assert_eq!(entries[1].1, JournalOp::Commit);
        assert!(matches!(entries[0].0, Participant::Writer(_)));
        assert_eq!(entries[2].0, Participant::Executor);
    }
}
