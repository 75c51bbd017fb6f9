//! Tests for tracker state persistence, migration and pruning

mod test_utils;

use apwatch::data::{Subscription, Tracker, UserId};
use apwatch::store::subscriptions::SubscriptionFile;
use apwatch::store::tracker_state::{TrackerStateEntry, TrackerStateFile};
use apwatch::store::{JsonFileStorage, MemoryStorage, SubscriptionStore, TrackerStateStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use test_utils::pending_state;

async fn subscriptions(subs: &[(u64, &str, &[(&str, &str)])]) -> SubscriptionStore {
    let store = SubscriptionStore::open(Box::new(MemoryStorage::<SubscriptionFile>::new())).unwrap();
    for (user, name, trackers) in subs {
        for (room, slot) in trackers.iter() {
            store
                .add_tracker(UserId(*user), name, Tracker::new(*room, *slot))
                .await
                .unwrap();
        }
    }
    store
}

#[tokio::test]
async fn test_upsert_and_get() {
    let store = TrackerStateStore::open(Box::new(MemoryStorage::<TrackerStateFile>::new())).unwrap();
    let state = pending_state("r", "s", 5, &[]);

    store.upsert(UserId(1), "alice", state.clone()).await;
    assert_eq!(store.get(UserId(1), &Tracker::new("r", "s")).await, Some(state));
    assert_eq!(store.get(UserId(2), &Tracker::new("r", "s")).await, None);
}

#[tokio::test]
async fn test_pending_by_user_skips_empty_trackers() {
    let store = TrackerStateStore::open(Box::new(MemoryStorage::<TrackerStateFile>::new())).unwrap();
    store.upsert(UserId(1), "alice", pending_state("r", "quiet", 5, &[])).await;
    store
        .upsert(UserId(1), "alice", pending_state("r", "busy", 7, &[("Bow", 7)]))
        .await;
    store.upsert(UserId(2), "bob", pending_state("r", "s", 1, &[])).await;

    let pending = store.pending_by_user().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[&UserId(1)].len(), 1);
    assert_eq!(pending[&UserId(1)][0].tracker, Tracker::new("r", "busy"));

    store.clear_pending(UserId(1), &Tracker::new("r", "busy")).await;
    assert!(store.pending_by_user().await.is_empty());
}

#[tokio::test]
async fn test_prune_removes_unsubscribed_states() {
    let subs = subscriptions(&[(1, "alice", &[("r", "keep")])]).await;
    let store = TrackerStateStore::open(Box::new(MemoryStorage::<TrackerStateFile>::new())).unwrap();
    store.upsert(UserId(1), "alice", pending_state("r", "keep", 1, &[])).await;
    store.upsert(UserId(1), "alice", pending_state("r", "gone", 1, &[])).await;
    store.upsert(UserId(9), "zed", pending_state("r", "keep", 1, &[])).await;

    let removed = store.prune(&subs.list_all().await).await;

    assert_eq!(removed, 2);
    assert!(store.get(UserId(1), &Tracker::new("r", "keep")).await.is_some());
    assert!(store.get(UserId(1), &Tracker::new("r", "gone")).await.is_none());
    assert_eq!(store.snapshot().await.entries.len(), 1);
}

#[tokio::test]
async fn test_legacy_entries_are_adopted_by_username() {
    let subs = subscriptions(&[(42, "dave#1234", &[("room", "1")])]).await;
    let legacy = TrackerStateFile {
        entries: vec![
            TrackerStateEntry {
                user_id: None,
                username: "dave#1234".to_string(),
                trackers: vec![pending_state("room", "1", 12, &[])],
            },
            TrackerStateEntry {
                user_id: None,
                username: "nobody".to_string(),
                trackers: vec![pending_state("room", "2", 3, &[])],
            },
        ],
    };
    let store = TrackerStateStore::open(Box::new(MemoryStorage::with_snapshot(legacy))).unwrap();

    let adopted = store.adopt_legacy(&subs.list_all().await).await;

    assert_eq!(adopted, 1);
    let state = store.get(UserId(42), &Tracker::new("room", "1")).await.unwrap();
    assert_eq!(state.last_order_received, 12);

    let file = store.snapshot().await;
    assert_eq!(file.entries.len(), 1);
    assert_eq!(file.entries[0].user_id, Some(UserId(42)));
}

#[tokio::test]
async fn test_legacy_entry_does_not_override_id_keyed_state() {
    let subs = subscriptions(&[(42, "dave", &[("room", "1")])]).await;
    let file = TrackerStateFile {
        entries: vec![
            TrackerStateEntry {
                user_id: Some(UserId(42)),
                username: "dave".to_string(),
                trackers: vec![pending_state("room", "1", 30, &[])],
            },
            TrackerStateEntry {
                user_id: None,
                username: "dave".to_string(),
                trackers: vec![pending_state("room", "1", 2, &[])],
            },
        ],
    };
    let store = TrackerStateStore::open(Box::new(MemoryStorage::with_snapshot(file))).unwrap();

    assert_eq!(store.adopt_legacy(&subs.list_all().await).await, 0);
    let state = store.get(UserId(42), &Tracker::new("room", "1")).await.unwrap();
    assert_eq!(state.last_order_received, 30);
}

#[tokio::test]
async fn test_persist_writes_original_layout() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recent_checks.json");

    let store = TrackerStateStore::open(Box::new(JsonFileStorage::new(&path))).unwrap();
    store
        .upsert(UserId(5), "erin", pending_state("AbC", "2", 9, &[("Hookshot", 9)]))
        .await;
    store.persist().await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entry = &raw["entries"][0];
    assert_eq!(entry["user_id"], 5);
    assert_eq!(entry["username"], "erin");
    assert_eq!(entry["trackers"][0]["room"], "AbC");
    assert_eq!(entry["trackers"][0]["lastOrderReceived"], 9);
    assert_eq!(entry["trackers"][0]["items"][0]["name"], "Hookshot");
    assert_eq!(entry["trackers"][0]["items"][0]["lastOrderReceived"], 9);

    let reopened = TrackerStateStore::open(Box::new(JsonFileStorage::new(&path))).unwrap();
    let state = reopened.get(UserId(5), &Tracker::new("AbC", "2")).await.unwrap();
    assert_eq!(state.pending_items.len(), 1);
}

#[tokio::test]
async fn test_persist_retries_once() {
    let storage: Arc<MemoryStorage<TrackerStateFile>> = Arc::new(MemoryStorage::new());
    let store = TrackerStateStore::open(Box::new(storage.clone())).unwrap();
    store.upsert(UserId(1), "a", pending_state("r", "s", 1, &[])).await;

    storage.fail_next_saves(1);
    assert!(store.persist().await.is_ok());

    storage.fail_next_saves(2);
    assert!(store.persist().await.is_err());
}

#[test]
fn test_subscription_type_contains() {
    let sub = Subscription {
        user_id: UserId(1),
        username: "a".to_string(),
        trackers: vec![Tracker::new("r", "s")],
    };
    assert!(sub.contains(&Tracker::new("r", "s")));
    assert!(!sub.contains(&Tracker::new("r", "t")));
}
