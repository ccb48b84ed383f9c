//! Sync coordination
//!
//! Owns the push/pull cycle, its retry policy, and the status surface
//! the UI reads. At most one cycle runs at a time; a trigger that
//! arrives mid-cycle is a no-op rather than a queued second run. Push
//! and pull are sequential within a cycle so a pulled change is always
//! merged against the freshest local state.

mod transport;

pub use transport::{
    HttpTransport, MemoryTransport, PullResponse, PushOutcome, PushRequest, PushResponse,
    RemoteTransport,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::db::{ChangeLog, RecordStore, SyncMeta};
use crate::error::{Error, Result};
use crate::models::{ChangeEntry, SyncCursor};
use crate::service::{SatchelService, SharedStore, StoreInner};

/// Tunables for the sync cycle
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Entries per push batch (transport limit)
    pub batch_size: usize,
    /// Bounded attempts per batch before the cycle ends in error
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Acknowledged tombstones older than this are compacted
    pub tombstone_retention: Duration,
    /// Periodic trigger interval, if any
    pub interval: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            tombstone_retention: Duration::from_secs(30 * 24 * 60 * 60),
            interval: Some(Duration::from_secs(60)),
        }
    }
}

impl SyncSettings {
    /// Set the periodic trigger interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Disable the periodic trigger (explicit sync only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.interval = None;
        self
    }

    /// Set the push batch size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Where the cycle state machine currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
    /// Last cycle ended in error; cleared when the next cycle starts
    Error,
}

/// Read-only status projection for UI consumption
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Completion time of the last fully successful cycle (Unix ms)
    pub last_sync_at: Option<i64>,
    pub pending_changes: u64,
    pub last_error: Option<String>,
}

/// What one cycle accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: u64,
    pub pulled: u64,
    pub purged: u64,
    /// A cycle was already in flight; nothing was done
    pub skipped: bool,
}

/// Cooperative cancellation checked between batches, never mid-batch
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Request cancellation; the in-flight batch still completes
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct StatusInner {
    phase: SyncPhase,
    last_sync_at: Option<i64>,
    last_error: Option<String>,
}

/// Orchestrates push, pull, conflict resolution, and compaction
pub struct SyncCoordinator<T> {
    store: SharedStore,
    transport: T,
    settings: SyncSettings,
    state: Mutex<StatusInner>,
    cycle: tokio::sync::Mutex<()>,
    cancel: CancelFlag,
}

impl<T: RemoteTransport> SyncCoordinator<T> {
    /// Build a coordinator sharing the service's store
    #[must_use]
    pub fn new(service: &SatchelService, transport: T, settings: SyncSettings) -> Self {
        Self {
            store: service.shared(),
            transport,
            settings,
            state: Mutex::new(StatusInner {
                phase: SyncPhase::Idle,
                last_sync_at: None,
                last_error: None,
            }),
            cycle: tokio::sync::Mutex::new(()),
            cancel: CancelFlag::default(),
        }
    }

    /// Flag that stops the cycle between batches (e.g. app backgrounding)
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Current status snapshot plus a live pending count
    pub async fn status(&self) -> SyncStatus {
        let pending_changes = {
            let inner = self.store.lock().await;
            ChangeLog::new(inner.db.connection())
                .pending_count()
                .unwrap_or(0)
        };
        let state = self.state();
        SyncStatus {
            phase: state.phase,
            last_sync_at: state.last_sync_at,
            pending_changes,
            last_error: state.last_error.clone(),
        }
    }

    /// Run one push + pull + compaction cycle
    ///
    /// Re-entrant triggers are no-ops: if a cycle is already in flight
    /// the call returns immediately with `skipped = true`.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::debug!("Sync already in flight; trigger ignored");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        };

        self.set_phase(SyncPhase::Pushing);
        let pushed = match self.push_phase().await {
            Ok(pushed) => pushed,
            Err(error) => return Err(self.record_error(error, "push")),
        };

        self.set_phase(SyncPhase::Pulling);
        let pulled = match self.pull_phase().await {
            Ok(pulled) => pulled,
            Err(error) => return Err(self.record_error(error, "pull")),
        };

        let purged = match self.compact().await {
            Ok(purged) => purged,
            Err(error) => return Err(self.record_error(error, "compaction")),
        };

        {
            let mut state = self.state();
            state.phase = SyncPhase::Idle;
            state.last_sync_at = Some(Utc::now().timestamp_millis());
            state.last_error = None;
        }

        tracing::info!("Sync cycle complete: pushed {pushed}, pulled {pulled}, purged {purged}");
        Ok(SyncReport {
            pushed,
            pulled,
            purged,
            skipped: false,
        })
    }

    /// Run the periodic trigger until cancelled
    pub async fn run_periodic(&self) {
        let Some(interval) = self.settings.interval else {
            return;
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick

        loop {
            ticker.tick().await;
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(error) = self.sync_once().await {
                tracing::warn!("Periodic sync failed: {error}");
            }
        }
    }

    /// Drain the change log in bounded batches
    async fn push_phase(&self) -> Result<u64> {
        let mut pushed = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Sync cancelled between push batches");
                break;
            }

            let batch = {
                let inner = self.store.lock().await;
                ChangeLog::new(inner.db.connection()).peek_batch(self.settings.batch_size)?
            };
            if batch.is_empty() {
                break;
            }

            let outcomes = self.push_with_retry(&batch).await?;

            let mut inner = self.store.lock().await;
            let StoreInner { db, device } = &mut *inner;
            for outcome in &outcomes {
                match outcome {
                    PushOutcome::Accepted { record_id, version } => {
                        ChangeLog::new(db.connection()).acknowledge(record_id, *version)?;
                        RecordStore::new(db, device).mark_acknowledged(record_id, *version)?;
                        pushed += 1;
                    }
                    PushOutcome::Rejected {
                        record_id,
                        version,
                        reason,
                    } => {
                        // Rejections are deterministic; requeueing would
                        // wedge the ledger forever.
                        tracing::error!("Remote rejected {record_id} v{version}: {reason}");
                        ChangeLog::new(db.connection()).acknowledge(record_id, *version)?;
                    }
                }
            }
        }

        Ok(pushed)
    }

    /// Fetch and apply remote pages until the stream is drained
    async fn pull_phase(&self) -> Result<u64> {
        let mut pulled = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Sync cancelled between pull batches");
                break;
            }

            let cursor = {
                let inner = self.store.lock().await;
                SyncMeta::new(inner.db.connection()).cursor()?
            };
            let response = self.pull_with_retry(&cursor).await?;

            {
                let mut inner = self.store.lock().await;
                let StoreInner { db, device } = &mut *inner;
                let mut store = RecordStore::new(db, device);
                for record in &response.records {
                    store.apply(record)?;
                    pulled += 1;
                }
                drop(store);

                // Advance only once the whole batch is applied; a crash
                // before this line re-fetches and replays idempotently.
                if response.next_cursor != cursor.token {
                    SyncMeta::new(db.connection()).store_cursor(&SyncCursor {
                        last_pulled_at: Utc::now().timestamp_millis(),
                        token: response.next_cursor.clone(),
                    })?;
                }
            }

            if !response.has_more {
                break;
            }
        }

        Ok(pulled)
    }

    /// Purge acknowledged tombstones past the retention window
    async fn compact(&self) -> Result<u64> {
        let mut inner = self.store.lock().await;
        let StoreInner { db, device } = &mut *inner;
        let retention_ms = i64::try_from(self.settings.tombstone_retention.as_millis())
            .unwrap_or(i64::MAX);
        let purged = RecordStore::new(db, device)
            .purge_expired_tombstones(retention_ms, Utc::now().timestamp_millis())?;
        Ok(purged as u64)
    }

    async fn push_with_retry(&self, batch: &[ChangeEntry]) -> Result<Vec<PushOutcome>> {
        let mut attempt = 0u32;
        loop {
            match self.transport.push(batch).await {
                Ok(outcomes) => return Ok(outcomes),
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.settings.max_attempts {
                        return Err(error);
                    }
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        "Push attempt {attempt} failed: {error}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn pull_with_retry(&self, cursor: &SyncCursor) -> Result<PullResponse> {
        let mut attempt = 0u32;
        loop {
            match self.transport.pull(cursor).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.settings.max_attempts {
                        return Err(error);
                    }
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        "Pull attempt {attempt} failed: {error}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.settings.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    fn record_error(&self, error: Error, phase: &str) -> Error {
        tracing::warn!("Sync {phase} phase failed: {error}");
        let mut state = self.state();
        state.phase = SyncPhase::Error;
        state.last_error = Some(error.to_string());
        error
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.state().phase = phase;
    }

    fn state(&self) -> MutexGuard<'_, StatusInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
