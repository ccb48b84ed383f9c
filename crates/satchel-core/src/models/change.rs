//! Change log entry model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{DeviceId, Record, RecordId};

/// Mutation kind recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidPayload(format!("unknown change op: {other}"))),
        }
    }
}

/// A local mutation awaiting remote acknowledgment
///
/// Entries are append-only and removed only when the coordinator
/// acknowledges `(record_id, version)` or a newer acknowledged version
/// supersedes them, giving at-least-once delivery across crashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub record_id: RecordId,
    pub op: ChangeOp,
    /// Post-operation snapshot of the full record
    pub snapshot: Record,
    pub version: u64,
    pub device_id: DeviceId,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
}

impl ChangeEntry {
    /// Build an entry from a post-operation record snapshot
    #[must_use]
    pub fn from_snapshot(op: ChangeOp, snapshot: Record, enqueued_at: i64) -> Self {
        Self {
            record_id: snapshot.id.clone(),
            op,
            version: snapshot.version,
            device_id: snapshot.device_id.clone(),
            snapshot,
            enqueued_at,
        }
    }
}
