//! Sync metadata repository: cursor, device row, conflict audit log

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores u64 versions as i64

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{DeviceId, SyncConflict, SyncCursor};

const CURSOR_KEY: &str = "cursor";
const DEVICE_KEY: &str = "device";

/// Persisted device identity state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRow {
    pub device_id: DeviceId,
    /// Next value of the per-device record counter
    pub next_record_seq: u64,
    /// Highest timestamp ever issued; keeps `updated_at` monotonic
    pub clock_floor: i64,
}

/// Repository for the single-row sync bookkeeping tables
pub struct SyncMeta<'a> {
    conn: &'a Connection,
}

impl<'a> SyncMeta<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Load the pull cursor, defaulting to "from the beginning"
    pub fn cursor(&self) -> Result<SyncCursor> {
        match self.get_value(CURSOR_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(SyncCursor::default()),
        }
    }

    /// Persist the pull cursor
    pub fn store_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        self.set_value(CURSOR_KEY, &serde_json::to_string(cursor)?)
    }

    /// Load the device row, if one has been provisioned
    pub fn device_row(&self) -> Result<Option<DeviceRow>> {
        match self.get_value(DEVICE_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist the device row
    pub fn store_device_row(&self, row: &DeviceRow) -> Result<()> {
        self.set_value(DEVICE_KEY, &serde_json::to_string(row)?)
    }

    /// Record a resolved conflict for later inspection
    #[allow(clippy::too_many_arguments)]
    pub fn insert_conflict(
        &self,
        record_id: &str,
        local_version: u64,
        remote_version: u64,
        resolved_version: u64,
        winner_device: &str,
        strategy: &str,
        resolved_at: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (
                record_id, local_version, remote_version, resolved_version,
                winner_device, strategy, resolved_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record_id,
                local_version as i64,
                remote_version as i64,
                resolved_version as i64,
                winner_device,
                strategy,
                resolved_at
            ],
        )?;
        Ok(())
    }

    /// List recently resolved conflicts, newest first
    pub fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, local_version, remote_version, resolved_version,
                    winner_device, strategy, resolved_at
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SyncConflict {
                    id: row.get(0)?,
                    record_id: row.get(1)?,
                    local_version: row.get::<_, i64>(2)? as u64,
                    remote_version: row.get::<_, i64>(3)? as u64,
                    resolved_version: row.get::<_, i64>(4)? as u64,
                    winner_device: row.get(5)?,
                    strategy: row.get(6)?,
                    resolved_at: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM sync_meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}
