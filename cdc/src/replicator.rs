//! The replication core: main loop, state machine and commit coordination.
//!
//! A single worker task owns every participant. It pulls framed events from
//! the upstream, gates them through the [`EventFilter`], routes row events
//! to per-table bulk writers and statements to the executor, and enforces
//! the commit-all-then-persist protocol at every transaction boundary.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::cdc_error;
use crate::checkpoint::GtidCheckpoint;
use crate::classifier::QueryClassifier;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown};
use crate::destination::{Destination, StatementExecutor, TableWriter};
use crate::error::{CdcResult, ErrorKind};
use crate::filter::EventFilter;
use crate::registry::TableRegistry;
use crate::source::{ReplicationConnector, ReplicationStream};
use crate::types::{Event, EventData, Gtid, GtidList};

/// Delay between connection attempts when the upstream is unreachable.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Runtime settings of the replication core.
///
/// `resume_gtid` is the configured starting position; a GTID found in the
/// checkpoint file overrides it at startup. An empty `table_allowlist`
/// replicates every table.
#[derive(Debug, Clone)]
pub struct ReplicatorSettings {
    pub resume_gtid: Option<Gtid>,
    pub table_allowlist: HashSet<String>,
    pub checkpoint_dir: PathBuf,
}

/// Which participant class currently holds the open downstream transaction.
///
/// The whole point of the state machine is that at most one of the two ever
/// does: crossing the boundary first commits the active side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicationState {
    /// Row events are being routed to bulk writers.
    Bulk,
    /// Query events are being routed to the statement executor.
    Stmt,
}

/// Handle to a running replication stream.
///
/// Created by [`Replicator::start`], which spawns the worker task. The
/// handle observes worker health through [`Replicator::ok`] and requests
/// termination with [`Replicator::shutdown`]; both are safe to use from a
/// supervisor context while the worker runs. Stopping is idempotent.
#[derive(Debug)]
pub struct Replicator {
    running: Arc<AtomicBool>,
    shutdown_tx: ShutdownTx,
    worker: Option<JoinHandle<CdcResult<()>>>,
}

impl Replicator {
    /// Starts a new replication stream and returns its handle.
    ///
    /// Must be called within a tokio runtime. The worker connects lazily,
    /// so this returns immediately even when the upstream is down.
    pub fn start<N, D, E>(
        settings: ReplicatorSettings,
        connector: N,
        destination: D,
        executor: E,
        classifier: Arc<dyn QueryClassifier>,
    ) -> Self
    where
        N: ReplicationConnector,
        D: Destination,
        D::Writer: Sync,
        E: StatementExecutor + Sync,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = create_shutdown();

        let worker = Worker {
            filter: EventFilter::new(settings.table_allowlist.clone(), classifier),
            checkpoint: GtidCheckpoint::new(&settings.checkpoint_dir),
            resume: settings.resume_gtid,
            connector,
            destination,
            executor,
            tables: TableRegistry::new(),
            state: ReplicationState::Stmt,
            current_gtid: None,
            implicit_commit: false,
            last_commit: None,
            shutdown_rx,
        };

        let worker_running = running.clone();
        let handle = tokio::spawn(async move {
            let result = worker.run().await;
            worker_running.store(false, Ordering::SeqCst);

            match &result {
                Ok(()) => info!("replicator worker stopped"),
                // Log here so the failure is visible even when the handle is
                // never awaited.
                Err(err) => error!(error = %err, "replicator worker failed"),
            }

            result
        });

        Self {
            running,
            shutdown_tx,
            worker: Some(handle),
        }
    }

    /// Returns true while the worker is alive and has not hit a fatal
    /// error.
    pub fn ok(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests a graceful stop. Idempotent; an in-flight commit runs to
    /// completion before the worker exits.
    pub fn shutdown(&self) {
        self.shutdown_tx.shutdown();
    }

    /// Waits for the worker to terminate and returns its final result.
    pub async fn wait(mut self) -> CdcResult<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            cdc_error!(ErrorKind::WorkerFailed, "replicator worker panicked")
                .with_source(err)
        })?
    }

    /// Requests a stop and waits for the worker to finish.
    pub async fn shutdown_and_wait(self) -> CdcResult<()> {
        self.shutdown();
        self.wait().await
    }
}

struct Worker<N, D, E>
where
    N: ReplicationConnector,
    D: Destination,
    E: StatementExecutor,
{
    connector: N,
    destination: D,
    executor: E,
    filter: EventFilter,
    checkpoint: GtidCheckpoint,
    tables: TableRegistry<D::Writer>,
    state: ReplicationState,
    /// Position replication restarts from; advances only on full commits.
    resume: Option<Gtid>,
    /// GTID of the transaction currently being processed.
    current_gtid: Option<Gtid>,
    /// Set when the current GTID announces an implicitly committed
    /// statement.
    implicit_commit: bool,
    last_commit: Option<Instant>,
    shutdown_rx: ShutdownRx,
}

impl<N, D, E> Worker<N, D, E>
where
    N: ReplicationConnector,
    D: Destination,
    E: StatementExecutor,
{
    async fn run(mut self) -> CdcResult<()> {
        let result = self.process_events().await;

        // Whatever the reason for stopping, never try to salvage partial
        // work: the checkpoint already marks what was durably committed.
        self.executor.rollback().await;
        self.tables.rollback_all().await;

        result
    }

    async fn process_events(&mut self) -> CdcResult<()> {
        if let Some(gtid) = self.checkpoint.load().await? {
            info!(gtid = %gtid, "continuing from checkpointed gtid");
            self.resume = Some(gtid);
        } else if let Some(gtid) = &self.resume {
            info!(gtid = %gtid, "starting from configured gtid");
        }

        let mut stream: Option<N::Stream> = None;

        while !self.shutdown_rx.is_shutdown() {
            let Some(active) = stream.as_mut() else {
                match self.connect().await {
                    Ok(opened) => stream = Some(opened),
                    Err(err)
                        if matches!(
                            err.kind(),
                            ErrorKind::ConnectionFailed | ErrorKind::ConnectionLost
                        ) =>
                    {
                        warn!(error = %err, "failed to connect to the upstream, retrying");
                        let mut shutdown_rx = self.shutdown_rx.clone();
                        tokio::select! {
                            _ = shutdown_rx.requested() => {}
                            _ = sleep(RECONNECT_DELAY) => {}
                        }
                    }
                    Err(err) => return Err(err),
                }
                continue;
            };

            let mut shutdown_rx = self.shutdown_rx.clone();
            let fetched = tokio::select! {
                _ = shutdown_rx.requested() => break,
                fetched = active.fetch_event() => fetched,
            };

            match fetched {
                Ok(Some(event)) => {
                    if self.filter.should_process(&event)? {
                        // A failure here may require manual intervention, so
                        // the safest thing to do is to stop processing data.
                        self.process_one_event(event).await?;
                    }
                }
                Ok(None) => {
                    warn!("upstream ended the stream, reconnecting");
                    stream = None;
                }
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "replication connection lost, reconnecting");
                    stream = None;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Opens a replication channel at the right position.
    ///
    /// With a resume GTID in effect the channel is anchored at the start of
    /// the latest binlog whose starting GTIDs do not exceed the target; that
    /// guarantees the format description event is delivered and gives the
    /// skip gate a GTID event to anchor on.
    async fn connect(&mut self) -> CdcResult<N::Stream> {
        let start = match self.resume {
            Some(target) => {
                let anchor = self.binlog_start_for(&target).await?;
                self.filter.arm(target);
                info!(
                    start = %anchor,
                    target = %target,
                    "skipping events until the resume gtid"
                );
                anchor
            }
            None => GtidList::default(),
        };

        let stream = self.connector.start_replication(&start).await?;
        info!(start = %start, "replication channel open");

        Ok(stream)
    }

    async fn binlog_start_for(&self, target: &Gtid) -> CdcResult<GtidList> {
        let mut output = GtidList::default();

        for binlog in self.connector.list_binlogs().await? {
            let position = self.connector.gtid_pos_at(&binlog).await?;
            if position.newer_than(target) {
                // This binlog already starts past the target; the previous
                // one contains it.
                break;
            }
            output = position;
        }

        Ok(output)
    }

    async fn process_one_event(&mut self, event: Event) -> CdcResult<()> {
        match event.data {
            EventData::Gtid(gtid) => {
                if gtid.is_implicit_commit() {
                    self.implicit_commit = true;
                }
                let gtid = Gtid::new(gtid.domain_id, event.server_id, gtid.sequence_nr);
                debug!(gtid = %gtid, "transaction begins");
                self.current_gtid = Some(gtid);
            }

            EventData::Xid(xid) => {
                self.commit_transactions().await?;
                self.advance_committed();
                debug!(
                    gtid = ?self.resume,
                    transaction_nr = xid.transaction_nr,
                    "transaction committed"
                );
            }

            EventData::TableMap(table_map) => {
                // A writer that cannot be opened is fatal: continuing would
                // silently drop every row change for this table.
                let writer = self.destination.open_table(&table_map).await?;
                self.tables.insert(table_map.table_id, writer).await;
            }

            EventData::Query(query) => {
                self.set_state(ReplicationState::Stmt).await?;
                self.executor.enqueue(query)?;

                if self.implicit_commit {
                    self.implicit_commit = false;
                    self.commit_transactions().await?;
                    self.advance_committed();
                }
            }

            EventData::WriteRows(rows)
            | EventData::UpdateRows(rows)
            | EventData::DeleteRows(rows) => {
                // No writer means the table was filtered at its TABLE_MAP.
                if self.tables.get_mut(rows.table_id).is_none() {
                    return Ok(());
                }

                self.set_state(ReplicationState::Bulk).await?;

                if let Some(writer) = self.tables.get_mut(rows.table_id) {
                    debug!(
                        table = %format_args!("{}.{}", writer.database(), writer.table()),
                        "rows event"
                    );
                    writer.enqueue(rows)?;
                }
            }

            EventData::Other => {}
        }

        Ok(())
    }

    /// Commits the executor and every bulk writer, then persists the
    /// current GTID.
    ///
    /// The ordering is the correctness argument: the checkpoint only
    /// advances once every participant has committed, so a failed commit
    /// leaves the persisted position behind the failed transaction and a
    /// restart re-delivers it.
    async fn commit_transactions(&mut self) -> CdcResult<()> {
        let mut result = self.executor.commit().await;

        if let Err(err) = self.tables.commit_all().await {
            if result.is_ok() {
                result = Err(err);
            }
        }

        match result {
            Ok(()) => {
                if let Some(gtid) = self.current_gtid {
                    self.checkpoint.save(&gtid).await?;
                }
                Ok(())
            }
            Err(err) => {
                error!(
                    gtid = ?self.current_gtid,
                    error = %err,
                    "one or more transactions failed to commit"
                );
                Err(err)
            }
        }
    }

    /// Switches the active participant class, committing outstanding work
    /// of the side being left. On failure the state is unchanged and the
    /// error is fatal to the caller.
    async fn set_state(&mut self, target: ReplicationState) -> CdcResult<()> {
        if self.state != target {
            self.commit_transactions().await?;
            self.state = target;
        }

        Ok(())
    }

    fn advance_committed(&mut self) {
        self.resume = self.current_gtid;
        if let Some(previous) = self.last_commit.replace(Instant::now()) {
            debug!(
                since_last_ms = previous.elapsed().as_millis() as u64,
                "committed position advanced"
            );
        }
    }
}
