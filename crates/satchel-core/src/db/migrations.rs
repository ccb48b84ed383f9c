//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: record table, change log, sync metadata
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY
         );
         CREATE TABLE IF NOT EXISTS records (
             id TEXT PRIMARY KEY,
             kind TEXT NOT NULL,
             payload TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL,
             device_id TEXT NOT NULL,
             version INTEGER NOT NULL,
             tombstone INTEGER NOT NULL DEFAULT 0,
             sync_state TEXT NOT NULL,
             synced_version INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_records_updated ON records(updated_at DESC);
         CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
         CREATE INDEX IF NOT EXISTS idx_records_tombstone ON records(tombstone);
         CREATE TABLE IF NOT EXISTS change_log (
             seq INTEGER PRIMARY KEY AUTOINCREMENT,
             record_id TEXT NOT NULL,
             op TEXT NOT NULL,
             snapshot TEXT NOT NULL,
             version INTEGER NOT NULL,
             device_id TEXT NOT NULL,
             enqueued_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_change_log_record ON change_log(record_id, version);
         CREATE TABLE IF NOT EXISTS sync_meta (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: conflict resolution audit log
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS sync_conflicts (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             record_id TEXT NOT NULL,
             local_version INTEGER NOT NULL,
             remote_version INTEGER NOT NULL,
             resolved_version INTEGER NOT NULL,
             winner_device TEXT NOT NULL,
             strategy TEXT NOT NULL,
             resolved_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(record_id);
         CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved ON sync_conflicts(resolved_at DESC);
         INSERT INTO schema_version (version) VALUES (2);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
