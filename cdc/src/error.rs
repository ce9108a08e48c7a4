use std::{error, fmt, result};

/// Type alias for convenience when using the [`Result`] type with our error.
pub type CdcResult<T> = result::Result<T, CdcError>;

/// Internal error representation with kind, description and optional source.
///
/// Uses boxing to keep the public error type size consistent and enable rich
/// error context without penalizing the success path.
struct ErrorInner {
    kind: ErrorKind,
    description: String,
    detail: Option<String>,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/// Error classification for the replication pipeline.
///
/// The kinds follow the recovery policy of the replicator: only
/// [`ErrorKind::ConnectionLost`] is recovered locally by reconnecting,
/// everything else stops the worker so the operator can intervene and a
/// restart resumes from the last checkpointed GTID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Could not establish a connection to the upstream or downstream server.
    ConnectionFailed,
    /// An established connection dropped mid-operation.
    ConnectionLost,
    /// The server rejected our credentials.
    AuthenticationFailed,
    /// A wire-protocol frame violated the expected layout.
    ProtocolViolation,
    /// A SQL statement failed on the server it was sent to.
    QueryFailed,
    /// The configured resume GTID can no longer be reached on the upstream.
    ResumeTargetUnreachable,
    /// A table writer could not be constructed from a TABLE_MAP event.
    TableOpenFailed,
    /// One or more participants failed to commit their transaction.
    CommitFailed,
    /// Reading or writing the GTID checkpoint file failed.
    CheckpointIoFailed,
    /// A row image used a column type the writer cannot decode.
    UnsupportedColumnType,
    /// A statement could not be parsed by the query classifier.
    StatementParseFailed,
    /// A configuration value is missing or malformed.
    InvalidConfiguration,
    /// The replicator worker terminated abnormally.
    WorkerFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionFailed => "connection failed",
            Self::ConnectionLost => "connection lost",
            Self::AuthenticationFailed => "authentication failed",
            Self::ProtocolViolation => "protocol violation",
            Self::QueryFailed => "query failed",
            Self::ResumeTargetUnreachable => "resume target unreachable",
            Self::TableOpenFailed => "table open failed",
            Self::CommitFailed => "commit failed",
            Self::CheckpointIoFailed => "checkpoint i/o failed",
            Self::UnsupportedColumnType => "unsupported column type",
            Self::StatementParseFailed => "statement parse failed",
            Self::InvalidConfiguration => "invalid configuration",
            Self::WorkerFailed => "worker failed",
        };
        f.write_str(name)
    }
}

/// A stable error type for the replication library.
///
/// The public API exposes the [`ErrorKind`] for classification while the
/// boxed inner value carries human-readable context and the source error
/// chain. Construction normally goes through the [`crate::cdc_error!`] and
/// [`crate::bail!`] macros.
pub struct CdcError(Box<ErrorInner>);

impl CdcError {
    /// Creates a new error with the given kind and description.
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        CdcError(Box::new(ErrorInner {
            kind,
            description: description.into(),
            detail: None,
            source: None,
        }))
    }

    /// Attaches a dynamic detail string to the error.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.0.detail = Some(detail.into());
        self
    }

    /// Attaches a source error to the chain.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        self.0.source = Some(source.into());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    /// Returns true if the error is a transient network failure that the
    /// replicator recovers from by reconnecting.
    pub fn is_transient(&self) -> bool {
        self.0.kind == ErrorKind::ConnectionLost
    }
}

impl fmt::Debug for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdcError")
            .field("kind", &self.0.kind)
            .field("description", &self.0.description)
            .field("detail", &self.0.detail)
            .field("source", &self.0.source)
            .finish()
    }
}

impl fmt::Display for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.description)?;
        if let Some(detail) = &self.0.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl error::Error for CdcError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &str)> for CdcError {
    fn from((kind, description): (ErrorKind, &str)) -> Self {
        CdcError::new(kind, description)
    }
}

impl From<(ErrorKind, &str, String)> for CdcError {
    fn from((kind, description, detail): (ErrorKind, &str, String)) -> Self {
        CdcError::new(kind, description).with_detail(detail)
    }
}

impl From<sqlx::Error> for CdcError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Configuration(_) => ErrorKind::InvalidConfiguration,
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                ErrorKind::ConnectionLost
            }
            sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => ErrorKind::ProtocolViolation,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // Connection exceptions (Class 08) surface as lost connections.
                Some(code) if code.starts_with("08") => ErrorKind::ConnectionLost,
                Some("28000") => ErrorKind::AuthenticationFailed,
                _ => ErrorKind::QueryFailed,
            },
            _ => ErrorKind::QueryFailed,
        };

        CdcError::new(kind, "downstream sql operation failed")
            .with_detail(err.to_string())
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_description_and_detail() {
        let error = CdcError::new(ErrorKind::CommitFailed, "transaction did not commit")
            .with_detail("gtid 0-1-5".to_string());

        assert_eq!(
            error.to_string(),
            "commit failed: transaction did not commit (gtid 0-1-5)"
        );
        assert_eq!(error.kind(), ErrorKind::CommitFailed);
    }

    #[test]
    fn only_lost_connections_are_transient() {
        assert!(CdcError::new(ErrorKind::ConnectionLost, "gone").is_transient());
        assert!(!CdcError::new(ErrorKind::QueryFailed, "bad").is_transient());
        assert!(!CdcError::new(ErrorKind::ConnectionFailed, "refused").is_transient());
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let error =
            CdcError::new(ErrorKind::ConnectionLost, "read failed").with_source(io);

        assert!(std::error::Error::source(&error).is_some());
    }
}
