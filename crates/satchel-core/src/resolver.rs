//! Deterministic record merge
//!
//! Pure functions only: every replica (and the reference backend) feeds
//! the same pair of records through the same code and lands on the same
//! resolution, which is what lets the system converge without locks or
//! server-side coordination.

use crate::models::{DeviceId, Record, SyncState};

/// Strategy name recorded in the conflict audit log
pub const STRATEGY_LWW: &str = "lww";

/// How a pulled remote record was reconciled with the local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Remote is already contained in the local lineage
    KeepLocal,
    /// Remote strictly dominates; adopted verbatim
    FastForward,
    /// Concurrent edit; a new version was minted
    Resolved,
    /// Same id and version with diverging payloads from one device;
    /// invariant violation, handled as a defect, never a crash
    Ambiguous,
}

/// Conflict audit data produced when a resolution mints a new version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub local_version: u64,
    pub remote_version: u64,
    pub resolved_version: u64,
    pub winner_device: DeviceId,
}

/// Outcome of [`merge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    /// The single record the store keeps
    pub record: Record,
    pub decision: MergeDecision,
    /// The resolution differs from the purely local state, so a change
    /// log entry is needed for other replicas to converge
    pub enqueue: bool,
    pub conflict: Option<ConflictInfo>,
}

/// Merge a pulled remote record into the local copy
///
/// `local.synced_version` is the base: the highest version of this
/// record's lineage known to be on the server. Divergence exists exactly
/// when the local version has moved past that base while the remote
/// version has too.
#[must_use]
pub fn merge(local: &Record, remote: &Record) -> Merge {
    debug_assert_eq!(local.id, remote.id, "merge requires same record id");

    // Already contained in the local lineage.
    if remote.version <= local.synced_version {
        return keep_local(local, local.synced_version);
    }

    if remote.version == local.version {
        if payload_equivalent(local, remote) {
            // Same point in history reached independently.
            return keep_local(local, remote.version);
        }
        if remote.device_id == local.device_id {
            // One device, one version, two payloads: cannot happen if the
            // version invariant holds.
            return Merge {
                record: local.clone(),
                decision: MergeDecision::Ambiguous,
                enqueue: false,
                conflict: None,
            };
        }
        return resolve(local, remote);
    }

    // Our own older write echoed back (for example after a crash lost the
    // push acknowledgment): provenance proves ancestry.
    if remote.device_id == local.device_id && remote.version < local.version {
        return keep_local(local, remote.version);
    }

    if remote.version > local.version && !local.has_unsynced_changes() {
        // Local is exactly the base; adopt the newer remote verbatim.
        let mut record = remote.clone();
        record.sync_state = SyncState::Synced;
        record.synced_version = remote.version;
        return Merge {
            record,
            decision: MergeDecision::FastForward,
            enqueue: false,
            conflict: None,
        };
    }

    // Neither version is an ancestor of the other.
    resolve(local, remote)
}

fn keep_local(local: &Record, acked_version: u64) -> Merge {
    let mut record = local.clone();
    record.synced_version = record.synced_version.max(acked_version);
    if !record.has_unsynced_changes() && record.sync_state != SyncState::Conflict {
        record.sync_state = SyncState::Synced;
    }
    Merge {
        record,
        decision: MergeDecision::KeepLocal,
        enqueue: false,
        conflict: None,
    }
}

fn resolve(local: &Record, remote: &Record) -> Merge {
    let record = resolve_concurrent(local, remote);
    let enqueue =
        record.payload != local.payload || record.tombstone != local.tombstone;
    let conflict = ConflictInfo {
        local_version: local.version,
        remote_version: remote.version,
        resolved_version: record.version,
        winner_device: record.device_id.clone(),
    };
    Merge {
        record,
        decision: MergeDecision::Resolved,
        enqueue,
        conflict: Some(conflict),
    }
}

/// Deterministically resolve two concurrent copies of one record
///
/// Tombstones are sticky against concurrent edits; otherwise the later
/// `updated_at` wins and ties break on the lexicographically greater
/// device id. The resolution always mints `max(versions) + 1` so it
/// becomes a new, unambiguous point in the history that every replica
/// fast-forwards to.
#[must_use]
pub fn resolve_concurrent(local: &Record, remote: &Record) -> Record {
    let winner = if local.tombstone != remote.tombstone {
        if local.tombstone { local } else { remote }
    } else if local.updated_at != remote.updated_at {
        if local.updated_at > remote.updated_at {
            local
        } else {
            remote
        }
    } else if local.device_id > remote.device_id {
        local
    } else {
        remote
    };

    Record {
        id: local.id.clone(),
        kind: local.kind,
        payload: winner.payload.clone(),
        created_at: local.created_at.min(remote.created_at),
        updated_at: local.updated_at.max(remote.updated_at),
        device_id: winner.device_id.clone(),
        version: local.version.max(remote.version) + 1,
        tombstone: winner.tombstone,
        sync_state: SyncState::Synced,
        synced_version: remote.version,
    }
}

/// Server-side upsert outcome for a pushed snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// First copy of this record
    Inserted(Record),
    /// Duplicate or already-superseded delivery; accepted idempotently
    Unchanged,
    /// Snapshot descends from the stored copy
    FastForwarded(Record),
    /// Concurrent with the stored copy; resolution minted
    Resolved(Record),
}

/// Reconcile a pushed snapshot against the stored copy
///
/// The backend runs the same policy as the clients, so two devices that
/// push divergent copies of the same version see the server mint exactly
/// the resolution each of them computes locally. Exact replays never get
/// here: the caller's idempotency ledger filters duplicate
/// `(record, device, version)` deliveries first, so a lower-version
/// arrival with different content is a genuinely concurrent edit.
#[must_use]
pub fn reconcile_upsert(stored: Option<&Record>, incoming: &Record) -> Upsert {
    let Some(stored) = stored else {
        return Upsert::Inserted(normalize(incoming));
    };

    if incoming.version > stored.version {
        // Descent is provable when the snapshot was built on a base at or
        // past the stored version, or when one device's linear history
        // simply moved forward.
        if incoming.synced_version >= stored.version || incoming.device_id == stored.device_id {
            return Upsert::FastForwarded(normalize(incoming));
        }
        return Upsert::Resolved(normalize(&resolve_concurrent(stored, incoming)));
    }

    if payload_equivalent(stored, incoming) {
        return Upsert::Unchanged;
    }

    Upsert::Resolved(normalize(&resolve_concurrent(stored, incoming)))
}

fn normalize(record: &Record) -> Record {
    let mut normalized = record.clone();
    normalized.sync_state = SyncState::Synced;
    normalized.synced_version = normalized.version;
    normalized
}

fn payload_equivalent(a: &Record, b: &Record) -> bool {
    a.payload == b.payload && a.tombstone == b.tombstone
}
