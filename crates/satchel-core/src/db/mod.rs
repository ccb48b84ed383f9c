//! Local persistence layer for Satchel

mod change_log;
mod connection;
mod migrations;
mod record_store;
mod sync_meta;

pub use change_log::ChangeLog;
pub use connection::Database;
pub use record_store::{ApplyOutcome, RecordFilter, RecordStore};
pub use sync_meta::{DeviceRow, SyncMeta};
