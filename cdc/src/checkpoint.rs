//! Durable storage for the last committed GTID.
//!
//! The checkpoint is a single text file holding one GTID terminated by a
//! newline. Writes go to a temporary sibling first and are published with an
//! atomic rename, so a crash mid-save leaves either the previous position or
//! the new one, never a truncated value.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};
use crate::types::Gtid;

const STATEFILE_NAME: &str = "current_gtid.txt";
const STATEFILE_TMP_SUFFIX: &str = ".tmp";

/// File-backed store for the committed GTID position.
#[derive(Debug, Clone)]
pub struct GtidCheckpoint {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl GtidCheckpoint {
    /// Creates a checkpoint store rooted in `dir`. Nothing is touched on
    /// disk until the first save.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(STATEFILE_NAME);
        let mut tmp_name = STATEFILE_NAME.to_owned();
        tmp_name.push_str(STATEFILE_TMP_SUFFIX);
        let tmp_path = dir.as_ref().join(tmp_name);
        Self { path, tmp_path }
    }

    /// Loads the persisted GTID, if any.
    ///
    /// A missing file means no position has been saved yet and is not an
    /// error; every other I/O failure is, since resuming from the wrong
    /// position would re-apply or skip transactions.
    pub async fn load(&self) -> CdcResult<Option<Gtid>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(cdc_error!(
                    ErrorKind::CheckpointIoFailed,
                    "failed to read checkpoint file",
                    self.path.display()
                )
                .with_source(err));
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let gtid = trimmed.parse().map_err(|_| {
            cdc_error!(
                ErrorKind::CheckpointIoFailed,
                "checkpoint file holds a malformed gtid",
                format!("`{trimmed}` in {}", self.path.display())
            )
        })?;

        Ok(Some(gtid))
    }

    /// Persists `gtid` with write-then-rename atomicity.
    pub async fn save(&self, gtid: &Gtid) -> CdcResult<()> {
        let contents = format!("{gtid}\n");

        fs::write(&self.tmp_path, contents).await.map_err(|err| {
            cdc_error!(
                ErrorKind::CheckpointIoFailed,
                "failed to write checkpoint temp file",
                self.tmp_path.display()
            )
            .with_source(err)
        })?;

        fs::rename(&self.tmp_path, &self.path).await.map_err(|err| {
            cdc_error!(
                ErrorKind::CheckpointIoFailed,
                "failed to publish checkpoint file",
                self.path.display()
            )
            .with_source(err)
        })?;

        debug!(gtid = %gtid, "checkpoint saved");

        Ok(())
    }
}
