//! Change log repository
//!
//! Append-only ledger of local mutations awaiting remote acknowledgment.
//! Entries are dropped only by `acknowledge`, which is what gives the
//! push path at-least-once delivery across crashes.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores u64 versions as i64

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{ChangeEntry, ChangeOp, RecordId};

/// Repository over the `change_log` table
pub struct ChangeLog<'a> {
    conn: &'a Connection,
}

impl<'a> ChangeLog<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append an entry to the ledger
    pub fn append(&self, entry: &ChangeEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO change_log (record_id, op, snapshot, version, device_id, enqueued_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.record_id.as_str(),
                entry.op.as_str(),
                serde_json::to_string(&entry.snapshot)?,
                entry.version as i64,
                entry.device_id.as_str(),
                entry.enqueued_at
            ],
        )?;
        Ok(())
    }

    /// Oldest entries first, FIFO per record, bounded by `max`
    pub fn peek_batch(&self, max: usize) -> Result<Vec<ChangeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, op, snapshot, version, device_id, enqueued_at
             FROM change_log
             ORDER BY seq ASC
             LIMIT ?",
        )?;

        let rows = stmt.query_map(params![max as i64], |row| {
            let record_id: String = row.get(0)?;
            let op: String = row.get(1)?;
            let snapshot: String = row.get(2)?;
            let version: i64 = row.get(3)?;
            let device_id: String = row.get(4)?;
            let enqueued_at: i64 = row.get(5)?;
            Ok((record_id, op, snapshot, version, device_id, enqueued_at))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (record_id, op, snapshot, version, device_id, enqueued_at) = row?;
            entries.push(ChangeEntry {
                record_id: record_id.parse()?,
                op: op.parse::<ChangeOp>()?,
                snapshot: serde_json::from_str(&snapshot)?,
                version: version as u64,
                device_id: device_id.parse()?,
                enqueued_at,
            });
        }

        Ok(entries)
    }

    /// Drop all entries for the record with version at or below the
    /// acknowledged one
    pub fn acknowledge(&self, record_id: &RecordId, version: u64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM change_log WHERE record_id = ? AND version <= ?",
            params![record_id.as_str(), version as i64],
        )?;
        Ok(removed)
    }

    /// Number of entries still awaiting acknowledgment
    pub fn pending_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM change_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Whether any entry for the record is still queued
    pub fn has_pending_for(&self, record_id: &RecordId) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM change_log WHERE record_id = ?",
            params![record_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
