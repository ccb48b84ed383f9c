//! Device identity and id generation
//!
//! Each installation provisions a random device id on first run; no
//! coordination with other devices or the backend is ever required.
//! Record ids are `{device_id}-{counter}`, so creation works fully
//! offline and never collides across devices.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::{DeviceRow, SyncMeta};
use crate::error::Result;
use crate::models::{DeviceId, RecordId};

/// This install's identity plus the counters backing id generation and
/// monotonic timestamps
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    device_id: DeviceId,
    next_record_seq: u64,
    clock_floor: i64,
}

impl DeviceIdentity {
    /// Load the persisted identity, provisioning one on first run
    pub fn load_or_create(conn: &Connection) -> Result<Self> {
        let meta = SyncMeta::new(conn);

        if let Some(row) = meta.device_row()? {
            return Ok(Self {
                device_id: row.device_id,
                next_record_seq: row.next_record_seq,
                clock_floor: row.clock_floor,
            });
        }

        let identity = Self {
            device_id: DeviceId::generate(),
            next_record_seq: 1,
            clock_floor: 0,
        };
        identity.persist(conn)?;
        tracing::info!("Provisioned device identity {}", identity.device_id);
        Ok(identity)
    }

    /// This install's device id
    #[must_use]
    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Allocate a fresh, globally unique record id
    pub fn allocate_record_id(&mut self, conn: &Connection) -> Result<RecordId> {
        let seq = self.next_record_seq;
        self.next_record_seq += 1;
        self.persist(conn)?;
        Ok(RecordId::new(&self.device_id, seq))
    }

    /// Issue a write timestamp, monotonic per device even under clock skew
    pub fn next_timestamp(&mut self, conn: &Connection) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let stamped = now.max(self.clock_floor + 1);
        self.clock_floor = stamped;
        self.persist(conn)?;
        Ok(stamped)
    }

    fn persist(&self, conn: &Connection) -> Result<()> {
        SyncMeta::new(conn).store_device_row(&DeviceRow {
            device_id: self.device_id.clone(),
            next_record_seq: self.next_record_seq,
            clock_floor: self.clock_floor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn identity_survives_reload() {
        let db = Database::open_in_memory().unwrap();

        let first = DeviceIdentity::load_or_create(db.connection()).unwrap();
        let second = DeviceIdentity::load_or_create(db.connection()).unwrap();
        assert_eq!(first.device_id(), second.device_id());
    }

    #[test]
    fn record_ids_increase_and_persist() {
        let db = Database::open_in_memory().unwrap();
        let mut identity = DeviceIdentity::load_or_create(db.connection()).unwrap();

        let a = identity.allocate_record_id(db.connection()).unwrap();
        let b = identity.allocate_record_id(db.connection()).unwrap();
        assert_ne!(a, b);

        // A reload continues the counter instead of reusing ids.
        let mut reloaded = DeviceIdentity::load_or_create(db.connection()).unwrap();
        let c = reloaded.allocate_record_id(db.connection()).unwrap();
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn timestamps_are_strictly_monotonic() {
        let db = Database::open_in_memory().unwrap();
        let mut identity = DeviceIdentity::load_or_create(db.connection()).unwrap();

        let first = identity.next_timestamp(db.connection()).unwrap();
        let second = identity.next_timestamp(db.connection()).unwrap();
        let third = identity.next_timestamp(db.connection()).unwrap();
        assert!(second > first);
        assert!(third > second);
    }
}
