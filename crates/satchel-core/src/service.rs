//! Shared store service used by every capture surface
//!
//! This is the only surface the Capture Adapter side of the world talks
//! to: CRUD plus read projections. Sync internals (`apply`, the change
//! log, cursors) stay behind the coordinator. All access is serialized
//! through one async mutex, which is what makes mutations
//! single-writer and keeps merge writes from interleaving with local
//! edits.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::capture::PageContext;
use crate::db::{ChangeLog, Database, RecordFilter, RecordStore, SyncMeta};
use crate::device::DeviceIdentity;
use crate::error::Result;
use crate::models::{
    DeviceId, Payload, Record, RecordId, RecordKind, RecordPatch, SyncConflict,
};

/// Store state guarded by the service mutex
pub(crate) struct StoreInner {
    pub(crate) db: Database,
    pub(crate) device: DeviceIdentity,
}

pub(crate) type SharedStore = Arc<Mutex<StoreInner>>;

/// Thread-safe handle to the local record store
#[derive(Clone)]
pub struct SatchelService {
    store: SharedStore,
}

impl SatchelService {
    /// Open the service at the given filesystem path
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_database(Database::open(&db_path)?)
    }

    /// Open an in-memory service (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        Self::from_database(Database::open_in_memory()?)
    }

    fn from_database(db: Database) -> Result<Self> {
        let device = DeviceIdentity::load_or_create(db.connection())?;
        Ok(Self {
            store: Arc::new(Mutex::new(StoreInner { db, device })),
        })
    }

    pub(crate) fn shared(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// This install's device id
    pub async fn device_id(&self) -> DeviceId {
        self.store.lock().await.device.device_id().clone()
    }

    /// Create a new record
    pub async fn create(&self, kind: RecordKind, payload: Payload) -> Result<Record> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        RecordStore::new(db, device).create(kind, payload)
    }

    /// Create a record from a captured page context
    pub async fn create_from_context(
        &self,
        context: &PageContext,
        kind: RecordKind,
        content: &str,
    ) -> Result<Record> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        RecordStore::new(db, device).create_from_context(context, kind, content)
    }

    /// Apply a field patch to a record
    pub async fn update(&self, id: &RecordId, patch: &RecordPatch) -> Result<Record> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        RecordStore::new(db, device).update(id, patch)
    }

    /// Flip a task's completion state
    pub async fn toggle_completed(&self, id: &RecordId) -> Result<Record> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        let mut store = RecordStore::new(db, device);
        let current = store
            .get(id)?
            .filter(Record::is_live)
            .ok_or_else(|| crate::error::Error::NotFound(id.to_string()))?;
        let patch = RecordPatch {
            completed: Some(!current.payload.completed),
            ..RecordPatch::default()
        };
        store.update(id, &patch)
    }

    /// Tombstone a record
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        RecordStore::new(db, device).delete(id)
    }

    /// Get a record by id (tombstones included)
    pub async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        RecordStore::new(db, device).get(id)
    }

    /// List records matching the filter, most recently updated first
    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        RecordStore::new(db, device).list(filter)
    }

    /// List record ids matching a prefix, for short-id lookup
    pub async fn list_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let inner = self.store.lock().await;
        let mut stmt = inner.db.connection().prepare(
            "SELECT id FROM records
             WHERE tombstone = 0 AND id LIKE ?
             ORDER BY updated_at DESC
             LIMIT ?",
        )?;
        #[allow(clippy::cast_possible_wrap)]
        let ids = stmt
            .query_map(
                rusqlite::params![format!("{prefix}%"), limit as i64],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Recently resolved sync conflicts, newest first
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let inner = self.store.lock().await;
        SyncMeta::new(inner.db.connection()).list_conflicts(limit)
    }

    /// Change log entries still awaiting acknowledgment
    pub async fn pending_changes(&self) -> Result<u64> {
        let inner = self.store.lock().await;
        ChangeLog::new(inner.db.connection()).pending_count()
    }
}
