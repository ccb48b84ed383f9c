//! Sync conflict audit model

use serde::{Deserialize, Serialize};

/// Recorded sync conflict resolved by the deterministic merge policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Record involved in the conflict
    pub record_id: String,
    /// Local version at the moment of conflict
    pub local_version: u64,
    /// Incoming remote version
    pub remote_version: u64,
    /// Freshly minted version both sides converge to
    pub resolved_version: u64,
    /// Device whose payload won
    pub winner_device: String,
    /// Resolution strategy name
    pub strategy: String,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
}
