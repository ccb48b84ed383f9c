//! Record store
//!
//! Authoritative local table of records and their sync metadata. Every
//! mutating call updates exactly one record and appends exactly one
//! change-log entry inside a single transaction, so readers never observe
//! a partial write.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores u64 versions as i64

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::capture::{draft_payload, PageContext};
use crate::db::{ChangeLog, Database, SyncMeta};
use crate::device::DeviceIdentity;
use crate::error::{Error, Result};
use crate::models::{
    ChangeEntry, ChangeOp, Payload, Record, RecordId, RecordKind, RecordPatch, SyncState,
};
use crate::resolver::{self, MergeDecision, STRATEGY_LWW};

/// How `apply` reconciled a pulled remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First local copy of the record
    Created,
    /// Remote was already contained in the local lineage
    Unchanged,
    /// Remote strictly dominated and was adopted verbatim
    FastForwarded,
    /// Concurrent edit resolved; a new version was minted
    Resolved,
    /// Invariant violation detected; record parked in conflict state
    Ambiguous,
}

/// Read filter for [`RecordStore::list`]
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub kind: Option<RecordKind>,
    pub tag: Option<String>,
    pub url: Option<String>,
    /// Tombstoned records are excluded unless set
    pub include_tombstones: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Store over the `records` table
///
/// Mutating calls stamp writes through the device identity, which is why
/// the store borrows it mutably; the owning service serializes access.
pub struct RecordStore<'a> {
    conn: &'a Connection,
    device: &'a mut DeviceIdentity,
}

impl<'a> RecordStore<'a> {
    /// Create a store over the given database and device identity
    pub fn new(db: &'a Database, device: &'a mut DeviceIdentity) -> Self {
        Self {
            conn: db.connection(),
            device,
        }
    }

    /// Create a new record at version 1 and queue its change entry
    pub fn create(&mut self, kind: RecordKind, payload: Payload) -> Result<Record> {
        payload.validate(kind)?;

        let tx = self.conn.unchecked_transaction()?;
        let now = self.device.next_timestamp(self.conn)?;
        let id = self.device.allocate_record_id(self.conn)?;
        let record = Record::new(id, kind, payload, self.device.device_id().clone(), now);

        insert_record(self.conn, &record)?;
        ChangeLog::new(self.conn).append(&ChangeEntry::from_snapshot(
            ChangeOp::Create,
            record.clone(),
            now,
        ))?;
        tx.commit()?;

        tracing::debug!("Created {} {}", record.kind, record.id);
        Ok(record)
    }

    /// Create a record from a captured page context
    pub fn create_from_context(
        &mut self,
        context: &PageContext,
        kind: RecordKind,
        content: &str,
    ) -> Result<Record> {
        self.create(kind, draft_payload(context, kind, content))
    }

    /// Apply a field patch to a live record, bumping its version
    pub fn update(&mut self, id: &RecordId, patch: &RecordPatch) -> Result<Record> {
        let mut record = self.require_live(id)?;
        if patch.is_empty() {
            return Ok(record);
        }

        patch.apply_to(&mut record.payload);
        record.payload.validate(record.kind)?;

        let tx = self.conn.unchecked_transaction()?;
        let now = self.device.next_timestamp(self.conn)?;
        record.version += 1;
        record.updated_at = now;
        record.device_id = self.device.device_id().clone();
        record.sync_state = SyncState::Pending;

        update_record(self.conn, &record)?;
        ChangeLog::new(self.conn).append(&ChangeEntry::from_snapshot(
            ChangeOp::Update,
            record.clone(),
            now,
        ))?;
        tx.commit()?;

        Ok(record)
    }

    /// Tombstone a live record; the payload is retained so a concurrent
    /// remote update can still be merged against it
    pub fn delete(&mut self, id: &RecordId) -> Result<()> {
        let mut record = self.require_live(id)?;

        let tx = self.conn.unchecked_transaction()?;
        let now = self.device.next_timestamp(self.conn)?;
        record.version += 1;
        record.updated_at = now;
        record.device_id = self.device.device_id().clone();
        record.tombstone = true;
        record.sync_state = SyncState::Pending;

        update_record(self.conn, &record)?;
        ChangeLog::new(self.conn).append(&ChangeEntry::from_snapshot(
            ChangeOp::Delete,
            record.clone(),
            now,
        ))?;
        tx.commit()?;

        tracing::debug!("Tombstoned {} {}", record.kind, record.id);
        Ok(())
    }

    /// Reconcile a pulled remote record through the conflict resolver
    ///
    /// Coordinator-only entry point; never performs a raw overwrite, and
    /// re-applying the same remote version is a no-op.
    pub fn apply(&mut self, remote: &Record) -> Result<ApplyOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        let outcome = match self.get(&remote.id)? {
            None => {
                let mut record = remote.clone();
                record.sync_state = SyncState::Synced;
                record.synced_version = record.version;
                insert_record(self.conn, &record)?;
                ApplyOutcome::Created
            }
            Some(local) => {
                let merge = resolver::merge(&local, remote);
                match merge.decision {
                    MergeDecision::KeepLocal => {
                        if merge.record != local {
                            update_record(self.conn, &merge.record)?;
                        }
                        ApplyOutcome::Unchanged
                    }
                    MergeDecision::FastForward => {
                        update_record(self.conn, &merge.record)?;
                        ApplyOutcome::FastForwarded
                    }
                    MergeDecision::Resolved => {
                        let now = Utc::now().timestamp_millis();
                        update_record(self.conn, &merge.record)?;
                        if merge.enqueue {
                            let op = if merge.record.tombstone {
                                ChangeOp::Delete
                            } else {
                                ChangeOp::Update
                            };
                            ChangeLog::new(self.conn).append(&ChangeEntry::from_snapshot(
                                op,
                                merge.record.clone(),
                                now,
                            ))?;
                        }
                        if let Some(conflict) = &merge.conflict {
                            SyncMeta::new(self.conn).insert_conflict(
                                merge.record.id.as_str(),
                                conflict.local_version,
                                conflict.remote_version,
                                conflict.resolved_version,
                                conflict.winner_device.as_str(),
                                STRATEGY_LWW,
                                now,
                            )?;
                            tracing::info!(
                                "Resolved concurrent edit of {} at version {}",
                                merge.record.id,
                                conflict.resolved_version
                            );
                        }
                        ApplyOutcome::Resolved
                    }
                    MergeDecision::Ambiguous => {
                        tracing::error!(
                            "Ambiguous resolution for {}: same device and version with diverging payloads",
                            local.id
                        );
                        let mut parked = local;
                        parked.sync_state = SyncState::Conflict;
                        update_record(self.conn, &parked)?;
                        ApplyOutcome::Ambiguous
                    }
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Get a record by id, tombstoned or not
    pub fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let result = self.conn.query_row(
            "SELECT id, kind, payload, created_at, updated_at, device_id,
                    version, tombstone, sync_state, synced_version
             FROM records WHERE id = ?",
            params![id.as_str()],
            parse_record,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-only projection, most recently updated first
    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, payload, created_at, updated_at, device_id,
                    version, tombstone, sync_state, synced_version
             FROM records
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt
            .query_map([], parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let records = rows
            .into_iter()
            .filter(|record| filter.include_tombstones || record.is_live())
            .filter(|record| filter.kind.is_none_or(|kind| record.kind == kind))
            .filter(|record| {
                filter
                    .tag
                    .as_deref()
                    .is_none_or(|tag| record.payload.tags.iter().any(|t| t == tag))
            })
            .filter(|record| {
                filter
                    .url
                    .as_deref()
                    .is_none_or(|url| record.payload.url.as_deref() == Some(url))
            })
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(records)
    }

    /// Record a push acknowledgment for `(record_id, version)`
    pub fn mark_acknowledged(&mut self, id: &RecordId, version: u64) -> Result<()> {
        let Some(mut record) = self.get(id)? else {
            // Already purged; nothing to update.
            return Ok(());
        };

        record.synced_version = record.synced_version.max(version);
        if !record.has_unsynced_changes() && record.sync_state != SyncState::Conflict {
            record.sync_state = SyncState::Synced;
        }
        update_record(self.conn, &record)
    }

    /// Purge tombstones the server has acknowledged once they outlive the
    /// retention window
    pub fn purge_expired_tombstones(&mut self, retention_ms: i64, now: i64) -> Result<usize> {
        let purged = self.conn.execute(
            "DELETE FROM records
             WHERE tombstone = 1
               AND synced_version >= version
               AND updated_at <= ?
               AND NOT EXISTS (
                   SELECT 1 FROM change_log WHERE change_log.record_id = records.id
               )",
            params![now - retention_ms],
        )?;

        if purged > 0 {
            tracing::info!("Compacted {purged} acknowledged tombstones");
        }
        Ok(purged)
    }

    fn require_live(&self, id: &RecordId) -> Result<Record> {
        match self.get(id)? {
            Some(record) if record.is_live() => Ok(record),
            _ => Err(Error::NotFound(id.to_string())),
        }
    }
}

fn insert_record(conn: &Connection, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT INTO records (
            id, kind, payload, created_at, updated_at, device_id,
            version, tombstone, sync_state, synced_version
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.id.as_str(),
            record.kind.as_str(),
            record.payload.canonical_json()?,
            record.created_at,
            record.updated_at,
            record.device_id.as_str(),
            record.version as i64,
            i32::from(record.tombstone),
            record.sync_state.as_str(),
            record.synced_version as i64
        ],
    )?;
    Ok(())
}

fn update_record(conn: &Connection, record: &Record) -> Result<()> {
    let rows = conn.execute(
        "UPDATE records SET
            payload = ?, created_at = ?, updated_at = ?, device_id = ?,
            version = ?, tombstone = ?, sync_state = ?, synced_version = ?
         WHERE id = ?",
        params![
            record.payload.canonical_json()?,
            record.created_at,
            record.updated_at,
            record.device_id.as_str(),
            record.version as i64,
            i32::from(record.tombstone),
            record.sync_state.as_str(),
            record.synced_version as i64,
            record.id.as_str()
        ],
    )?;

    if rows == 0 {
        return Err(Error::NotFound(record.id.to_string()));
    }
    Ok(())
}

fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let device_id: String = row.get(5)?;
    let sync_state: String = row.get(8)?;

    Ok(Record {
        id: id.parse().map_err(|_| invalid_column(0, "record id"))?,
        kind: kind.parse().map_err(|_| invalid_column(1, "record kind"))?,
        payload: serde_json::from_str(&payload)
            .map_err(|_| invalid_column(2, "record payload"))?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        device_id: device_id
            .parse()
            .map_err(|_| invalid_column(5, "device id"))?,
        version: row.get::<_, i64>(6)? as u64,
        tombstone: row.get::<_, i32>(7)? != 0,
        sync_state: sync_state
            .parse()
            .map_err(|_| invalid_column(8, "sync state"))?,
        synced_version: row.get::<_, i64>(9)? as u64,
    })
}

fn invalid_column(index: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("stored {what} failed to parse").into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceId, Priority};

    fn setup() -> (Database, DeviceIdentity) {
        let db = Database::open_in_memory().unwrap();
        let device = DeviceIdentity::load_or_create(db.connection()).unwrap();
        (db, device)
    }

    fn task(title: &str) -> Payload {
        Payload {
            title: title.to_string(),
            ..Payload::default()
        }
    }

    #[test]
    fn create_starts_local_only_and_queues_entry() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let record = store.create(RecordKind::Task, task("Buy milk")).unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.sync_state, SyncState::LocalOnly);

        let log = ChangeLog::new(db.connection());
        let batch = log.peek_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].op, ChangeOp::Create);
        assert_eq!(batch[0].version, 1);
    }

    #[test]
    fn create_rejects_invalid_payload_without_state_change() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let error = store.create(RecordKind::Task, task("  ")).unwrap_err();
        assert!(matches!(error, Error::InvalidPayload(_)));
        assert!(store.list(&RecordFilter::default()).unwrap().is_empty());
        assert_eq!(ChangeLog::new(db.connection()).pending_count().unwrap(), 0);
    }

    #[test]
    fn update_bumps_version_and_stamps_device() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let record = store.create(RecordKind::Task, task("Buy milk")).unwrap();
        let patch = RecordPatch {
            title: Some("Buy oat milk".to_string()),
            priority: Some(Priority::High),
            ..RecordPatch::default()
        };
        let updated = store.update(&record.id, &patch).unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.payload.title, "Buy oat milk");
        assert_eq!(updated.sync_state, SyncState::Pending);
        assert!(updated.updated_at > record.updated_at);
        assert_eq!(ChangeLog::new(db.connection()).pending_count().unwrap(), 2);
    }

    #[test]
    fn update_missing_or_tombstoned_fails_not_found() {
        let (db, mut device) = setup();
        let unknown = RecordId::new(&DeviceId::generate(), 9);
        let mut store = RecordStore::new(&db, &mut device);

        let patch = RecordPatch {
            title: Some("nope".to_string()),
            ..RecordPatch::default()
        };
        assert!(matches!(
            store.update(&unknown, &patch).unwrap_err(),
            Error::NotFound(_)
        ));

        let record = store.create(RecordKind::Task, task("Soon gone")).unwrap();
        store.delete(&record.id).unwrap();
        assert!(matches!(
            store.update(&record.id, &patch).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn delete_keeps_payload_under_tombstone() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let record = store.create(RecordKind::Note, task("Keep my words")).unwrap();
        store.delete(&record.id).unwrap();

        let stored = store.get(&record.id).unwrap().unwrap();
        assert!(stored.tombstone);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.payload.title, "Keep my words");

        // Default projection hides it.
        assert!(store.list(&RecordFilter::default()).unwrap().is_empty());
        let all = store
            .list(&RecordFilter {
                include_tombstones: true,
                ..RecordFilter::default()
            })
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn version_counts_every_mutation() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let record = store.create(RecordKind::Task, task("Count me")).unwrap();
        let mut expected = 1;
        for title in ["two", "three", "four"] {
            let patch = RecordPatch {
                title: Some(title.to_string()),
                ..RecordPatch::default()
            };
            let updated = store.update(&record.id, &patch).unwrap();
            expected += 1;
            assert_eq!(updated.version, expected);
        }
        store.delete(&record.id).unwrap();
        assert_eq!(store.get(&record.id).unwrap().unwrap().version, expected + 1);
    }

    #[test]
    fn apply_inserts_unknown_remote_as_synced() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let other = DeviceId::generate();
        let remote = Record::new(
            RecordId::new(&other, 1),
            RecordKind::Task,
            task("From elsewhere"),
            other,
            2_000,
        );

        assert_eq!(store.apply(&remote).unwrap(), ApplyOutcome::Created);
        let stored = store.get(&remote.id).unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Synced);
        assert_eq!(stored.synced_version, 1);
    }

    #[test]
    fn apply_is_idempotent_under_replay() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let other = DeviceId::generate();
        let remote = Record::new(
            RecordId::new(&other, 1),
            RecordKind::Task,
            task("Replay me"),
            other,
            2_000,
        );

        store.apply(&remote).unwrap();
        let first = store.get(&remote.id).unwrap().unwrap();

        assert_eq!(store.apply(&remote).unwrap(), ApplyOutcome::Unchanged);
        let second = store.get(&remote.id).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(ChangeLog::new(db.connection()).pending_count().unwrap(), 0);
    }

    #[test]
    fn apply_resolves_concurrent_edit_and_logs_conflict() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let record = store.create(RecordKind::Task, task("Buy milk")).unwrap();
        // Pretend version 1 was pushed and acknowledged.
        store.mark_acknowledged(&record.id, 1).unwrap();
        ChangeLog::new(db.connection())
            .acknowledge(&record.id, 1)
            .unwrap();

        // Local edit while offline.
        let patch = RecordPatch {
            title: Some("Buy oat milk".to_string()),
            ..RecordPatch::default()
        };
        let local = store.update(&record.id, &patch).unwrap();

        // Remote concurrent edit with a later timestamp.
        let other = DeviceId::generate();
        let remote = Record {
            payload: Payload {
                priority: Priority::High,
                ..task("Buy milk")
            },
            updated_at: local.updated_at + 1_000,
            device_id: other,
            version: 2,
            sync_state: SyncState::Synced,
            synced_version: 1,
            ..record.clone()
        };

        assert_eq!(store.apply(&remote).unwrap(), ApplyOutcome::Resolved);
        let merged = store.get(&record.id).unwrap().unwrap();
        assert_eq!(merged.version, 3);
        assert_eq!(merged.payload.priority, Priority::High);

        let conflicts = SyncMeta::new(db.connection()).list_conflicts(5).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolved_version, 3);
    }

    #[test]
    fn tombstone_wins_against_concurrent_remote_edit() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let record = store.create(RecordKind::Task, task("Doomed")).unwrap();
        store.mark_acknowledged(&record.id, 1).unwrap();
        store.delete(&record.id).unwrap();

        let other = DeviceId::generate();
        let deleted = store.get(&record.id).unwrap().unwrap();
        let remote = Record {
            payload: task("Edited elsewhere, later"),
            updated_at: deleted.updated_at + 5_000,
            device_id: other,
            version: 2,
            tombstone: false,
            sync_state: SyncState::Synced,
            synced_version: 1,
            ..record.clone()
        };

        store.apply(&remote).unwrap();
        let merged = store.get(&record.id).unwrap().unwrap();
        assert!(merged.tombstone, "delete is sticky against concurrent edits");
        assert_eq!(merged.version, 3);
    }

    #[test]
    fn list_filters_by_kind_tag_and_url() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        store
            .create(
                RecordKind::Bookmark,
                Payload {
                    url: Some("https://example.org".to_string()),
                    tags: vec!["reading".to_string()],
                    ..task("Example")
                },
            )
            .unwrap();
        store.create(RecordKind::Task, task("Chore")).unwrap();

        let bookmarks = store
            .list(&RecordFilter {
                kind: Some(RecordKind::Bookmark),
                ..RecordFilter::default()
            })
            .unwrap();
        assert_eq!(bookmarks.len(), 1);

        let tagged = store
            .list(&RecordFilter {
                tag: Some("reading".to_string()),
                ..RecordFilter::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);

        let by_url = store
            .list(&RecordFilter {
                url: Some("https://example.org".to_string()),
                ..RecordFilter::default()
            })
            .unwrap();
        assert_eq!(by_url.len(), 1);
    }

    #[test]
    fn purge_waits_for_ack_and_retention() {
        let (db, mut device) = setup();
        let mut store = RecordStore::new(&db, &mut device);

        let record = store.create(RecordKind::Task, task("Old junk")).unwrap();
        store.delete(&record.id).unwrap();

        let now = store.get(&record.id).unwrap().unwrap().updated_at + 100;

        // Still queued and unacknowledged: never purged.
        assert_eq!(store.purge_expired_tombstones(0, now).unwrap(), 0);

        ChangeLog::new(db.connection())
            .acknowledge(&record.id, 2)
            .unwrap();
        store.mark_acknowledged(&record.id, 2).unwrap();

        // Acknowledged but inside the retention window.
        let week = 7 * 24 * 60 * 60 * 1_000;
        assert_eq!(store.purge_expired_tombstones(week, now).unwrap(), 0);

        // Acknowledged and aged out.
        assert_eq!(store.purge_expired_tombstones(0, now).unwrap(), 1);
        assert!(store.get(&record.id).unwrap().is_none());
    }
}
