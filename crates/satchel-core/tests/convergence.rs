//! Multi-device convergence scenarios
//!
//! Two (or three) services share one in-memory backend and play out the
//! offline-edit interleavings the engine exists for. The invariant under
//! test everywhere: after everyone has pushed and pulled, every replica
//! holds a byte-identical payload at the same version.

use std::time::Duration;

use pretty_assertions::assert_eq;
use satchel_core::db::{ChangeLog, Database, RecordFilter, RecordStore};
use satchel_core::device::DeviceIdentity;
use satchel_core::models::{Payload, Priority, RecordPatch, SyncCursor, SyncState};
use satchel_core::sync::{MemoryTransport, RemoteTransport, SyncCoordinator, SyncSettings};
use satchel_core::{RecordKind, SatchelService};

fn task(title: &str) -> Payload {
    Payload {
        title: title.to_string(),
        ..Payload::default()
    }
}

fn title_patch(title: &str) -> RecordPatch {
    RecordPatch {
        title: Some(title.to_string()),
        ..RecordPatch::default()
    }
}

async fn device(
    transport: &MemoryTransport,
) -> (SatchelService, SyncCoordinator<MemoryTransport>) {
    let service = SatchelService::open_in_memory().await.unwrap();
    let settings = SyncSettings {
        backoff_base: Duration::from_millis(1),
        ..SyncSettings::default()
    };
    let sync = SyncCoordinator::new(&service, transport.clone(), settings);
    (service, sync)
}

#[tokio::test(flavor = "multi_thread")]
async fn created_record_reaches_second_device_verbatim() {
    let transport = MemoryTransport::new();
    let (a, a_sync) = device(&transport).await;
    let (b, b_sync) = device(&transport).await;

    let record = a.create(RecordKind::Task, task("Buy milk")).await.unwrap();
    assert_eq!(record.sync_state, SyncState::LocalOnly);

    a_sync.sync_once().await.unwrap();
    assert_eq!(
        a.get(&record.id).await.unwrap().unwrap().sync_state,
        SyncState::Synced
    );

    b_sync.sync_once().await.unwrap();
    let copy = b.get(&record.id).await.unwrap().unwrap();
    assert_eq!(copy.version, 1);
    assert_eq!(copy.sync_state, SyncState::Synced);
    assert_eq!(
        copy.payload.canonical_json().unwrap(),
        record.payload.canonical_json().unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn divergent_offline_edits_converge_to_minted_version() {
    let transport = MemoryTransport::new();
    let (a, a_sync) = device(&transport).await;
    let (b, b_sync) = device(&transport).await;

    // Shared baseline at version 1.
    let record = a.create(RecordKind::Task, task("Buy milk")).await.unwrap();
    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();

    // Offline on A: retitle (earlier timestamp).
    a.update(&record.id, &title_patch("Buy oat milk"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Offline on B: raise priority (later timestamp).
    let priority_patch = RecordPatch {
        priority: Some(Priority::High),
        ..RecordPatch::default()
    };
    b.update(&record.id, &priority_patch).await.unwrap();

    // Both come online.
    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();
    a_sync.sync_once().await.unwrap();

    let on_a = a.get(&record.id).await.unwrap().unwrap();
    let on_b = b.get(&record.id).await.unwrap().unwrap();

    // The later edit won the whole payload and a fresh version was minted.
    assert_eq!(on_a.version, 3);
    assert_eq!(on_b.version, 3);
    assert_eq!(on_a.payload.title, "Buy milk");
    assert_eq!(on_a.payload.priority, Priority::High);
    assert_eq!(
        on_a.payload.canonical_json().unwrap(),
        on_b.payload.canonical_json().unwrap()
    );
    assert_eq!(on_a.device_id, on_b.device_id);

    // Both replicas consider themselves settled.
    assert_eq!(on_a.sync_state, SyncState::Synced);
    assert_eq!(on_b.sync_state, SyncState::Synced);
    assert_eq!(a.pending_changes().await.unwrap(), 0);
    assert_eq!(b.pending_changes().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn convergence_is_independent_of_sync_order() {
    let transport = MemoryTransport::new();
    let (a, a_sync) = device(&transport).await;
    let (b, b_sync) = device(&transport).await;

    let record = a.create(RecordKind::Task, task("Water plants")).await.unwrap();
    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();

    a.update(&record.id, &title_patch("Water the ferns"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    b.update(&record.id, &title_patch("Water the cactus"))
        .await
        .unwrap();

    // B syncs first this time.
    b_sync.sync_once().await.unwrap();
    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();

    let on_a = a.get(&record.id).await.unwrap().unwrap();
    let on_b = b.get(&record.id).await.unwrap().unwrap();
    assert_eq!(on_a.version, on_b.version);
    assert_eq!(
        on_a.payload.canonical_json().unwrap(),
        on_b.payload.canonical_json().unwrap()
    );
    // Later timestamp wins regardless of who reached the server first.
    assert_eq!(on_a.payload.title, "Water the cactus");
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_beats_concurrent_edit_everywhere() {
    let transport = MemoryTransport::new();
    let (a, a_sync) = device(&transport).await;
    let (b, b_sync) = device(&transport).await;

    let record = a.create(RecordKind::Note, task("Disposable")).await.unwrap();
    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();

    // A deletes while B edits with a later timestamp.
    a.delete(&record.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    b.update(&record.id, &title_patch("Actually keep this"))
        .await
        .unwrap();

    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();
    a_sync.sync_once().await.unwrap();

    let on_a = a.get(&record.id).await.unwrap().unwrap();
    let on_b = b.get(&record.id).await.unwrap().unwrap();
    assert!(on_a.tombstone, "delete is sticky");
    assert!(on_b.tombstone, "delete propagated over the concurrent edit");
    assert_eq!(on_a.version, on_b.version);

    // Neither device surfaces the record anymore.
    assert!(a.list(&RecordFilter::default()).await.unwrap().is_empty());
    assert!(b.list(&RecordFilter::default()).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joining_device_sees_only_resolved_state() {
    let transport = MemoryTransport::new();
    let (a, a_sync) = device(&transport).await;
    let (b, b_sync) = device(&transport).await;

    let record = a.create(RecordKind::Task, task("Original")).await.unwrap();
    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();

    a.update(&record.id, &title_patch("From A")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    b.update(&record.id, &title_patch("From B")).await.unwrap();
    a_sync.sync_once().await.unwrap();
    b_sync.sync_once().await.unwrap();

    // A third device starts from nothing and pulls once.
    let (c, c_sync) = device(&transport).await;
    c_sync.sync_once().await.unwrap();

    let on_c = c.get(&record.id).await.unwrap().unwrap();
    assert_eq!(on_c.payload.title, "From B");
    assert_eq!(on_c.version, 3);
    assert_eq!(on_c.sync_state, SyncState::Synced);

    // And it matches the settled copies on A and B.
    a_sync.sync_once().await.unwrap();
    let on_a = a.get(&record.id).await.unwrap().unwrap();
    assert_eq!(on_a.version, on_c.version);
    assert_eq!(
        on_a.payload.canonical_json().unwrap(),
        on_c.payload.canonical_json().unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_pull_page_leaves_state_untouched() {
    let transport = MemoryTransport::new();
    let (a, a_sync) = device(&transport).await;

    let record = a.create(RecordKind::Task, task("Replay target")).await.unwrap();
    a_sync.sync_once().await.unwrap();

    // A replica whose crash lost the cursor advance fetches the same
    // page twice and applies every record again.
    let db = Database::open_in_memory().unwrap();
    let mut identity = DeviceIdentity::load_or_create(db.connection()).unwrap();

    let first = transport.pull(&SyncCursor::default()).await.unwrap();
    let again = transport.pull(&SyncCursor::default()).await.unwrap();
    assert_eq!(first.records, again.records);

    let mut store = RecordStore::new(&db, &mut identity);
    for remote in first.records.iter().chain(again.records.iter()) {
        store.apply(remote).unwrap();
    }

    let copy = store.get(&record.id).unwrap().unwrap();
    assert_eq!(copy.version, 1);
    assert_eq!(
        copy.payload.canonical_json().unwrap(),
        record.payload.canonical_json().unwrap()
    );
    assert_eq!(ChangeLog::new(db.connection()).pending_count().unwrap(), 0);
}
