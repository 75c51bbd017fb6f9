//! Per-user tracker polling state (high-water marks and pending items).
//!
//! Layout on disk (`recent_checks.json`):
//! `{"entries": [{"user_id", "username", "trackers": [{"room", "slot",
//! "lastOrderReceived", "items": [{"name", "lastOrderReceived"}]}]}]}`
//!
//! State is keyed by the stable user id. Entries written by older versions
//! carry only a username; they are matched to a subscription once at startup
//! by [`TrackerStateStore::adopt_legacy`].

use super::{Storage, SubscriptionSnapshot};
use crate::data::{Tracker, TrackerState, UserId};
use crate::error::StorageError;
use crate::util::retry_once;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Persisted document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerStateFile {
    #[serde(default)]
    pub entries: Vec<TrackerStateEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerStateEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub trackers: Vec<TrackerState>,
}

#[derive(Debug, Clone, Default)]
struct UserStates {
    username: String,
    trackers: Vec<TrackerState>,
}

impl UserStates {
    fn find(&self, tracker: &Tracker) -> Option<&TrackerState> {
        self.trackers.iter().find(|s| &s.tracker == tracker)
    }

    fn find_mut(&mut self, tracker: &Tracker) -> Option<&mut TrackerState> {
        self.trackers.iter_mut().find(|s| &s.tracker == tracker)
    }
}

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<UserId, UserStates>,
    /// Entries without a user id, waiting to be matched by username
    legacy: Vec<TrackerStateEntry>,
}

impl Inner {
    fn from_file(file: TrackerStateFile) -> Self {
        let mut inner = Inner::default();
        for entry in file.entries {
            match entry.user_id {
                Some(user_id) => {
                    let user = inner.users.entry(user_id).or_default();
                    user.username = entry.username;
                    for state in entry.trackers {
                        match user.find_mut(&state.tracker) {
                            Some(existing) => merge_duplicate(existing, state),
                            None => user.trackers.push(state),
                        }
                    }
                }
                None => inner.legacy.push(entry),
            }
        }
        inner
    }

    fn to_file(&self) -> TrackerStateFile {
        let mut entries: Vec<TrackerStateEntry> = self
            .users
            .iter()
            .map(|(user_id, user)| TrackerStateEntry {
                user_id: Some(*user_id),
                username: user.username.clone(),
                trackers: user.trackers.clone(),
            })
            .collect();
        entries.extend(self.legacy.iter().cloned());
        TrackerStateFile { entries }
    }
}

/// Two records for the same tracker: keep the higher mark.
fn merge_duplicate(existing: &mut TrackerState, other: TrackerState) {
    if other.last_order_received > existing.last_order_received {
        *existing = other;
    }
}

/// Durable store of [`TrackerState`] keyed by (user id, room, slot).
pub struct TrackerStateStore {
    storage: Box<dyn Storage<TrackerStateFile>>,
    inner: Mutex<Inner>,
}

impl TrackerStateStore {
    pub fn open(storage: Box<dyn Storage<TrackerStateFile>>) -> Result<Self, StorageError> {
        let file = retry_once("Loading tracker state", || storage.load())?.unwrap_or_default();
        Ok(Self {
            storage,
            inner: Mutex::new(Inner::from_file(file)),
        })
    }

    pub async fn get(&self, user_id: UserId, tracker: &Tracker) -> Option<TrackerState> {
        let inner = self.inner.lock().await;
        inner.users.get(&user_id)?.find(tracker).cloned()
    }

    /// Insert or replace the state for `(user_id, state.tracker)`
    pub async fn upsert(&self, user_id: UserId, username: &str, state: TrackerState) {
        let mut inner = self.inner.lock().await;
        let user = inner.users.entry(user_id).or_default();
        user.username = username.to_string();
        match user.find_mut(&state.tracker) {
            Some(existing) => *existing = state,
            None => user.trackers.push(state),
        }
    }

    /// Every tracker holding undelivered items, grouped by user
    pub async fn pending_by_user(&self) -> BTreeMap<UserId, Vec<TrackerState>> {
        let inner = self.inner.lock().await;
        inner
            .users
            .iter()
            .filter_map(|(user_id, user)| {
                let pending: Vec<TrackerState> = user
                    .trackers
                    .iter()
                    .filter(|s| s.has_pending())
                    .cloned()
                    .collect();
                (!pending.is_empty()).then_some((*user_id, pending))
            })
            .collect()
    }

    /// Mark the tracker's pending items as delivered
    pub async fn clear_pending(&self, user_id: UserId, tracker: &Tracker) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .users
            .get_mut(&user_id)
            .and_then(|u| u.find_mut(tracker))
        {
            state.pending_items.clear();
        }
    }

    /// Drop states whose (user, room, slot) is no longer subscribed.
    ///
    /// Returns the number of tracker states removed.
    pub async fn prune(&self, subscriptions: &SubscriptionSnapshot) -> usize {
        let mut inner = self.inner.lock().await;
        let mut removed = 0;

        for (user_id, user) in inner.users.iter_mut() {
            let before = user.trackers.len();
            user.trackers
                .retain(|s| subscriptions.contains(*user_id, &s.tracker));
            removed += before - user.trackers.len();
        }
        inner.users.retain(|_, u| !u.trackers.is_empty());

        if removed > 0 {
            tracing::debug!("Pruned {} unsubscribed tracker states", removed);
        }
        removed
    }

    /// Attach username-only entries to the subscription with that username.
    ///
    /// Entries matching no subscription, or a user that already has id-keyed
    /// state, are discarded. Returns the number of entries adopted.
    pub async fn adopt_legacy(&self, subscriptions: &SubscriptionSnapshot) -> usize {
        let mut inner = self.inner.lock().await;
        let legacy = std::mem::take(&mut inner.legacy);
        let mut adopted = 0;

        for entry in legacy {
            let owner = subscriptions
                .users()
                .iter()
                .find(|s| s.username == entry.username);

            match owner {
                Some(sub) if !inner.users.contains_key(&sub.user_id) => {
                    tracing::info!(
                        user_id = %sub.user_id,
                        username = %entry.username,
                        "Migrated legacy tracker state"
                    );
                    inner.users.insert(
                        sub.user_id,
                        UserStates {
                            username: entry.username,
                            trackers: entry.trackers,
                        },
                    );
                    adopted += 1;
                }
                _ => {
                    tracing::warn!(
                        "Dropping legacy tracker state for {:?}: no matching subscription",
                        entry.username
                    );
                }
            }
        }

        adopted
    }

    /// Flush the current state to storage, retrying once on failure
    pub async fn persist(&self) -> Result<(), StorageError> {
        let file = self.inner.lock().await.to_file();
        retry_once("Saving tracker state", || self.storage.save(&file))
    }

    /// Copy of the document that `persist` would write
    pub async fn snapshot(&self) -> TrackerStateFile {
        self.inner.lock().await.to_file()
    }
}
