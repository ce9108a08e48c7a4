use std::fmt;
use std::str::FromStr;

use crate::bail;
use crate::error::{CdcError, CdcResult, ErrorKind};

/// A MariaDB global transaction identifier.
///
/// Serialized as `domain-server-sequence`. Two GTIDs are comparable only
/// when their domains match; within a domain the sequence number imposes a
/// total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gtid {
    pub domain: u32,
    pub server_id: u32,
    pub sequence: u64,
}

impl Gtid {
    pub fn new(domain: u32, server_id: u32, sequence: u64) -> Self {
        Self {
            domain,
            server_id,
            sequence,
        }
    }

    /// Returns true if `self` is strictly newer than `other` within the same
    /// domain. GTIDs from different domains are incomparable and never
    /// considered newer.
    pub fn newer_than(&self, other: &Gtid) -> bool {
        self.domain == other.domain && self.sequence > other.sequence
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.domain, self.server_id, self.sequence)
    }
}

impl FromStr for Gtid {
    type Err = CdcError;

    fn from_str(input: &str) -> CdcResult<Self> {
        let mut parts = input.trim().splitn(3, '-');
        let (Some(domain), Some(server_id), Some(sequence)) =
            (parts.next(), parts.next(), parts.next())
        else {
            bail!(
                ErrorKind::InvalidConfiguration,
                "malformed gtid",
                format!("expected domain-server-sequence, got `{input}`")
            );
        };

        Ok(Gtid {
            domain: parse_component(domain, input)?,
            server_id: parse_component(server_id, input)?,
            sequence: parse_component(sequence, input)?,
        })
    }
}

fn parse_component<T: FromStr>(value: &str, input: &str) -> CdcResult<T> {
    value.parse().map_err(|_| {
        crate::cdc_error!(
            ErrorKind::InvalidConfiguration,
            "malformed gtid",
            format!("non-numeric component in `{input}`")
        )
    })
}

/// An ordered list of GTIDs, one per domain, as reported by
/// `BINLOG_GTID_POS` and accepted by `@slave_connect_state`.
///
/// Serialized as a comma-separated list; the empty list serializes to the
/// empty string, which the upstream interprets as "start from the current
/// position".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtidList(Vec<Gtid>);

impl GtidList {
    pub fn new(gtids: Vec<Gtid>) -> Self {
        Self(gtids)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn gtids(&self) -> &[Gtid] {
        &self.0
    }

    /// Returns true if any element of the list is strictly newer than
    /// `target` within `target`'s domain.
    pub fn newer_than(&self, target: &Gtid) -> bool {
        self.0.iter().any(|gtid| gtid.newer_than(target))
    }
}

impl From<Gtid> for GtidList {
    fn from(gtid: Gtid) -> Self {
        Self(vec![gtid])
    }
}

impl fmt::Display for GtidList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, gtid) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{gtid}")?;
        }
        Ok(())
    }
}

impl FromStr for GtidList {
    type Err = CdcError;

    fn from_str(input: &str) -> CdcResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(GtidList::default());
        }

        trimmed
            .split(',')
            .map(|part| part.parse())
            .collect::<CdcResult<Vec<_>>>()
            .map(GtidList)
    }
}
