mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{watch, Notify};

use common::{memory_store, processor, Call, FakeRemote, TableRemote};
use estate_sync::connectivity::ConnectivityMonitor;
use estate_sync::queue::{
    DrainOutcome, EntryFilter, EntryStatus, EntryUpdate, Mutation, ProcessorConfig,
    QueueProcessor, QueueStore, MAX_RETRIES,
};
use estate_sync::remote::{
    Collection, LeaseData, PropertyData, Record, RemoteApi, RemoteError, TaskData, TaskStatus,
    TenantData,
};
use estate_sync::state::OfflineStateStore;

fn mark_done(record_id: &str) -> Mutation {
    Mutation::Update {
        record_id: record_id.to_string(),
        record: Record::Task(TaskData {
            status: Some(TaskStatus::Done),
            ..TaskData::default()
        }),
    }
}

fn new_tenant(record_id: &str, name: &str) -> Mutation {
    Mutation::Insert {
        record_id: record_id.to_string(),
        record: Record::Tenant(TenantData {
            full_name: Some(name.to_string()),
            ..TenantData::default()
        }),
    }
}

fn offline_state(
    store: &Arc<QueueStore>,
    remote: &Arc<FakeRemote>,
) -> (watch::Sender<bool>, OfflineStateStore) {
    let (online, rx) = watch::channel(false);
    let state = OfflineStateStore::new(Arc::clone(store), processor(store, remote), rx).unwrap();
    (online, state)
}

#[tokio::test]
async fn offline_mutations_accumulate_as_pending() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (_online, state) = offline_state(&store, &remote);

    for i in 0..5 {
        state.record(&mark_done(&format!("t{i}"))).unwrap();
    }

    assert_eq!(state.current().pending_sync_count, 5);
    assert_eq!(
        store.count(&EntryFilter::completed()).unwrap(),
        0,
        "nothing completes while offline"
    );
    assert_eq!(state.process_queue().await.unwrap(), DrainOutcome::Offline);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn insert_success_removes_exactly_one_entry() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (online, state) = offline_state(&store, &remote);

    state.record(&new_tenant("p1", "Ada Byron")).unwrap();
    state.record(&mark_done("t1")).unwrap();
    remote.script([None, Some("503 Service Unavailable")]);

    online.send(true).unwrap();
    let before = state.current().pending_sync_count;
    let outcome = state.process_queue().await.unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(state.current().pending_sync_count, before - 1);
    assert_eq!(store.count(&EntryFilter::all()).unwrap(), 1);
}

#[tokio::test]
async fn failed_update_is_kept_and_retried_next_pass() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (online, state) = offline_state(&store, &remote);

    let id = state.record(&mark_done("t1")).unwrap();
    online.send(true).unwrap();

    remote.script([Some("Network timeout")]);
    state.process_queue().await.unwrap();

    let entry = store.get(&id).unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.retry_count, 1);
    assert_eq!(entry.error_message.as_deref(), Some("Network timeout"));
    assert_eq!(
        remote.calls(),
        vec![Call::Update(Collection::Tasks, "t1".to_string())]
    );

    let outcome = state.process_queue().await.unwrap();
    assert_eq!(outcome.report().unwrap().success, 1);
    assert!(store.get(&id).unwrap().is_none());
    assert_eq!(remote.calls().len(), 2);
}

#[tokio::test]
async fn retry_count_never_decreases_and_caps_out() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (online, state) = offline_state(&store, &remote);

    let id = state.record(&mark_done("t1")).unwrap();
    online.send(true).unwrap();
    remote.fail_all(Some("500 Internal Server Error"));

    let mut last = 0;
    for _ in 0..5 {
        state.process_queue().await.unwrap();
        let retries = store.get(&id).unwrap().unwrap().retry_count;
        assert!(retries >= last);
        last = retries;
    }

    assert_eq!(last, MAX_RETRIES);
    assert_eq!(remote.calls().len(), MAX_RETRIES as usize);
    assert!(store
        .select(&EntryFilter::eligible(MAX_RETRIES))
        .unwrap()
        .is_empty());
    assert_eq!(state.current().pending_sync_count, 0);
    assert_eq!(state.stats().unwrap().dead_letters, 1);
}

#[tokio::test]
async fn replay_follows_global_enqueue_order() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (online, state) = offline_state(&store, &remote);

    state
        .record(&Mutation::Insert {
            record_id: "prop-1".to_string(),
            record: Record::Property(PropertyData {
                name: Some("Elm Court".to_string()),
                ..PropertyData::default()
            }),
        })
        .unwrap();
    state.record(&mark_done("t1")).unwrap();
    state
        .record(&Mutation::Update {
            record_id: "l1".to_string(),
            record: Record::Lease(LeaseData::default()),
        })
        .unwrap();
    state.record(&new_tenant("p2", "Grace Hopper")).unwrap();
    state
        .record(&Mutation::Delete {
            collection: Collection::Tasks,
            record_id: "t1".to_string(),
        })
        .unwrap();

    online.send(true).unwrap();
    state.process_queue().await.unwrap();

    assert_eq!(
        remote.calls(),
        vec![
            Call::Insert(Collection::Properties, "prop-1".to_string()),
            Call::Update(Collection::Tasks, "t1".to_string()),
            Call::Update(Collection::Leases, "l1".to_string()),
            Call::Insert(Collection::Tenants, "p2".to_string()),
            Call::Delete(Collection::Tasks, "t1".to_string()),
        ]
    );
}

#[tokio::test]
async fn failures_do_not_stop_the_pass() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (online, state) = offline_state(&store, &remote);

    for i in 0..4 {
        state.record(&mark_done(&format!("t{i}"))).unwrap();
    }
    remote.script([None, Some("409 Conflict"), None, Some("409 Conflict")]);

    online.send(true).unwrap();
    let outcome = state.process_queue().await.unwrap();

    let report = outcome.report().unwrap();
    assert_eq!((report.success, report.failed), (2, 2));
    assert_eq!(remote.calls().len(), 4);
}

#[tokio::test]
async fn clear_failed_items_removes_only_dead_letters() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (_online, state) = offline_state(&store, &remote);

    for (record_id, retries) in [("t1", 3), ("t2", 3), ("t3", 1)] {
        let id = state.record(&mark_done(record_id)).unwrap();
        for _ in 0..retries {
            store
                .update(&id, &EntryUpdate::new().status(EntryStatus::Syncing))
                .unwrap();
            store
                .update(
                    &id,
                    &EntryUpdate::new()
                        .status(EntryStatus::Failed)
                        .increment_retry(),
                )
                .unwrap();
        }
    }

    assert_eq!(state.clear_failed_items().unwrap(), 2);
    let remaining = store.select(&EntryFilter::all()).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].retry_count, 1);
}

/// Backend whose inserts block until released.
#[derive(Default)]
struct GatedRemote {
    entered: Notify,
    release: Notify,
    inserts: AtomicUsize,
}

#[async_trait]
impl RemoteApi for GatedRemote {
    async fn insert(&self, _record_id: &str, _record: &Record) -> Result<Value, RemoteError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Value::Null)
    }

    async fn update(&self, _record_id: &str, _record: &Record) -> Result<Value, RemoteError> {
        Ok(Value::Null)
    }

    async fn delete(&self, _collection: Collection, _record_id: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[tokio::test]
async fn concurrent_drain_request_is_a_noop() {
    let store = memory_store();
    let remote = Arc::new(GatedRemote::default());
    let processor = Arc::new(QueueProcessor::new(Arc::clone(&store), remote.clone()));
    let (_online, rx) = watch::channel(true);
    let state = Arc::new(OfflineStateStore::new(Arc::clone(&store), processor, rx).unwrap());

    state.record(&new_tenant("p1", "Ada Byron")).unwrap();

    let first = tokio::spawn({
        let state = Arc::clone(&state);
        async move { state.process_queue().await }
    });
    remote.entered.notified().await;

    assert!(state.current().is_syncing);
    assert_eq!(
        state.process_queue().await.unwrap(),
        DrainOutcome::AlreadyRunning
    );

    // Recorded mid-drain: not part of the running snapshot.
    state.record(&new_tenant("p2", "Grace Hopper")).unwrap();

    remote.release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.report().unwrap().success, 1);
    assert!(!state.current().is_syncing);
    assert_eq!(state.current().pending_sync_count, 1);

    let next = tokio::spawn({
        let state = Arc::clone(&state);
        async move { state.process_queue().await }
    });
    remote.entered.notified().await;
    remote.release.notify_one();
    assert_eq!(next.await.unwrap().unwrap().report().unwrap().success, 1);
    assert_eq!(state.current().pending_sync_count, 0);
}

#[tokio::test]
async fn second_processor_cannot_replay_an_entry_in_flight() {
    let store = memory_store();
    let remote = Arc::new(GatedRemote::default());
    let first = Arc::new(QueueProcessor::new(Arc::clone(&store), remote.clone()));
    let second = QueueProcessor::new(Arc::clone(&store), remote.clone());

    let id = estate_sync::queue::MutationRecorder::new(Arc::clone(&store))
        .record(&new_tenant("p1", "Ada Byron"))
        .unwrap();

    let running = tokio::spawn({
        let first = Arc::clone(&first);
        async move { first.drain().await }
    });
    remote.entered.notified().await;

    // Same queue, separate processor: the lease keeps it out.
    assert_eq!(second.drain().await.unwrap(), DrainOutcome::AlreadyRunning);
    assert_eq!(
        store.get(&id).unwrap().unwrap().status,
        EntryStatus::Syncing
    );

    remote.release.notify_one();
    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.report().unwrap().success, 1);
    assert_eq!(remote.inserts.load(Ordering::SeqCst), 1);
    assert!(store.get(&id).unwrap().is_none());

    // Lease released: the other processor can drain again.
    let outcome = second.drain().await.unwrap();
    assert_eq!(outcome.report().unwrap().total(), 0);
}

#[tokio::test]
async fn operations_on_one_record_replay_to_its_final_state() {
    let store = memory_store();
    let remote = TableRemote::new();
    let recorder = estate_sync::queue::MutationRecorder::new(Arc::clone(&store));

    recorder
        .record(&Mutation::Insert {
            record_id: "t1".to_string(),
            record: Record::Task(TaskData {
                title: Some("Fix boiler".to_string()),
                status: Some(TaskStatus::Open),
                ..TaskData::default()
            }),
        })
        .unwrap();
    recorder.record(&mark_done("t1")).unwrap();
    recorder
        .record(&Mutation::Insert {
            record_id: "t2".to_string(),
            record: Record::Task(TaskData {
                title: Some("Paint hallway".to_string()),
                ..TaskData::default()
            }),
        })
        .unwrap();
    recorder.record(&mark_done("t2")).unwrap();
    recorder
        .record(&Mutation::Delete {
            collection: Collection::Tasks,
            record_id: "t2".to_string(),
        })
        .unwrap();

    let processor = QueueProcessor::new(Arc::clone(&store), remote.clone());
    let outcome = processor.drain().await.unwrap();

    let report = outcome.report().unwrap();
    assert_eq!((report.success, report.failed), (5, 0));
    assert_eq!(
        remote.row(Collection::Tasks, "t1"),
        Some(json!({ "id": "t1", "title": "Fix boiler", "status": "done" }))
    );
    assert!(remote.row(Collection::Tasks, "t2").is_none());
    assert_eq!(remote.len(), 1);
    assert_eq!(store.count(&EntryFilter::all()).unwrap(), 0);
}

#[tokio::test]
async fn interrupted_entries_are_recovered_as_failed_attempts() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let (online, state) = offline_state(&store, &remote);

    let id = state.record(&mark_done("t1")).unwrap();
    store
        .update(&id, &EntryUpdate::new().status(EntryStatus::Syncing))
        .unwrap();

    online.send(true).unwrap();
    let outcome = state.process_queue().await.unwrap();

    // The reset counts as one attempt, then the entry replays in the same pass.
    assert_eq!(outcome.report().unwrap().success, 1);
    assert!(store.get(&id).unwrap().is_none());
}

/// Backend that never answers.
struct HangingRemote;

#[async_trait]
impl RemoteApi for HangingRemote {
    async fn insert(&self, _record_id: &str, _record: &Record) -> Result<Value, RemoteError> {
        std::future::pending().await
    }

    async fn update(&self, _record_id: &str, _record: &Record) -> Result<Value, RemoteError> {
        std::future::pending().await
    }

    async fn delete(&self, _collection: Collection, _record_id: &str) -> Result<(), RemoteError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_fails_the_entry() {
    let store = memory_store();
    let processor = QueueProcessor::with_config(
        Arc::clone(&store),
        Arc::new(HangingRemote),
        ProcessorConfig {
            max_retries: MAX_RETRIES,
            remote_timeout: Some(Duration::from_millis(250)),
        },
    );

    let id = estate_sync::queue::MutationRecorder::new(Arc::clone(&store))
        .record(&mark_done("t1"))
        .unwrap();

    let outcome = processor.drain().await.unwrap();
    assert_eq!(outcome.report().unwrap().failed, 1);

    let entry = store.get(&id).unwrap().unwrap();
    assert_eq!(
        entry.error_message.as_deref(),
        Some("Remote call timed out after 250 ms")
    );
    assert_eq!(entry.retry_count, 1);
}

#[tokio::test]
async fn reconnect_triggers_exactly_one_drain() {
    let store = memory_store();
    let remote = FakeRemote::new();
    let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
    let state = Arc::new(
        OfflineStateStore::new(
            Arc::clone(&store),
            processor(&store, &remote),
            monitor.subscribe(),
        )
        .unwrap(),
    );
    let listener = monitor.spawn(Arc::clone(&state));

    state.record(&mark_done("t1")).unwrap();
    state.record(&mark_done("t2")).unwrap();

    let mut updates = state.subscribe();
    monitor.set_online(true);

    tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|s| s.is_online && s.pending_sync_count == 0 && !s.is_syncing),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(remote.calls().len(), 2);

    drop(monitor);
    listener.await.unwrap();
    assert_eq!(remote.calls().len(), 2);
}
