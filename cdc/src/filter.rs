//! Event eligibility: GTID skip gating and the table allowlist.
//!
//! Two independent gates are applied in order. The skip gate discards every
//! event until the stream has moved past the resume GTID; the allowlist gate
//! then discards events for tables the configuration does not name.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cdc_error;
use crate::classifier::QueryClassifier;
use crate::error::{CdcResult, ErrorKind};
use crate::types::{Event, EventData, Gtid};

/// Skip state while winding the stream forward to the resume position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    /// Not skipping; every event is eligible.
    None,
    /// Rejecting everything until the resume GTID is observed.
    All,
    /// The resume GTID was seen; rejecting until its XID event.
    NextTransaction,
    /// The resume GTID carries the implicit-commit flag; rejecting its
    /// single statement.
    NextStatement,
}

/// Decides which upstream events the replicator processes.
pub struct EventFilter {
    skip: Skip,
    target: Option<Gtid>,
    allowlist: HashSet<String>,
    classifier: Arc<dyn QueryClassifier>,
}

impl EventFilter {
    pub fn new(allowlist: HashSet<String>, classifier: Arc<dyn QueryClassifier>) -> Self {
        Self {
            skip: Skip::None,
            target: None,
            allowlist,
            classifier,
        }
    }

    /// Arms the skip gate: every event is rejected until the stream reaches
    /// `target`. Called before replication starts whenever a resume GTID is
    /// in effect, since the channel is opened at the containing binlog's
    /// start position rather than at the target itself.
    pub fn arm(&mut self, target: Gtid) {
        self.target = Some(target);
        self.skip = Skip::All;
    }

    /// Returns true while the skip gate is still discarding events.
    pub fn is_skipping(&self) -> bool {
        self.skip != Skip::None
    }

    /// Returns whether `event` should be processed.
    ///
    /// Fails with [`ErrorKind::ResumeTargetUnreachable`] when a GTID newer
    /// than the armed target is observed first, which means the target has
    /// been purged from the upstream's binlogs.
    pub fn should_process(&mut self, event: &Event) -> CdcResult<bool> {
        if self.skip != Skip::None {
            self.apply_skip_gate(event)?;
            return Ok(false);
        }

        if self.allowlist.is_empty() {
            return Ok(true);
        }

        match &event.data {
            EventData::TableMap(table_map) => {
                let name = format!("{}.{}", table_map.database, table_map.table);
                Ok(self.allowlist.contains(&name))
            }
            EventData::Query(query) => {
                // Every participating table must be allowlisted for the
                // statement to run downstream.
                match self.classifier.table_references(&query.statement) {
                    Ok(references) => Ok(references
                        .iter()
                        .all(|r| self.allowlist.contains(&r.qualified(&query.database)))),
                    Err(err) => {
                        warn!(
                            error = %err,
                            statement = %query.statement,
                            "rejecting unclassifiable statement while an allowlist is active"
                        );
                        Ok(false)
                    }
                }
            }
            _ => Ok(true),
        }
    }

    fn apply_skip_gate(&mut self, event: &Event) -> CdcResult<()> {
        match self.skip {
            Skip::All => {
                let Some(gtid) = event.gtid() else {
                    return Ok(());
                };
                let Some(target) = self.target else {
                    return Ok(());
                };

                if gtid == target {
                    let implicit = matches!(
                        &event.data,
                        EventData::Gtid(g) if g.is_implicit_commit()
                    );
                    self.skip = if implicit {
                        Skip::NextStatement
                    } else {
                        Skip::NextTransaction
                    };
                    info!(gtid = %target, "reached resume gtid, skipping its transaction");
                } else if gtid.newer_than(&target) {
                    return Err(cdc_error!(
                        ErrorKind::ResumeTargetUnreachable,
                        "resume gtid has been purged from the upstream binlogs",
                        format!("observed {gtid}, wanted {target}")
                    ));
                }
            }
            Skip::NextStatement => {
                self.skip = Skip::None;
                self.log_resume_complete();
            }
            Skip::NextTransaction => {
                if matches!(event.data, EventData::Xid(_)) {
                    self.skip = Skip::None;
                    self.log_resume_complete();
                }
            }
            Skip::None => {}
        }

        Ok(())
    }

    fn log_resume_complete(&self) {
        if let Some(target) = &self.target {
            info!(gtid = %target, "resume transaction skipped, processing resumes");
        }
    }
}
