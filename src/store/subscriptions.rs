//! User → tracked (room, slot) subscriptions.
//!
//! Layout on disk (`trackers_to_scrape.json`):
//! `{"users": [{"user_id", "username", "trackers": [{"room", "slot"}]}]}`

use super::Storage;
use crate::data::{Subscription, TrackedSlot, Tracker, UserId};
use crate::error::StorageError;
use crate::util::retry_once;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persisted document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFile {
    #[serde(default)]
    pub users: Vec<SubscriptionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Missing in files written before user ids were recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub trackers: Vec<Tracker>,
}

impl From<&Subscription> for SubscriptionRecord {
    fn from(sub: &Subscription) -> Self {
        Self {
            user_id: Some(sub.user_id),
            username: sub.username.clone(),
            trackers: sub.trackers.clone(),
        }
    }
}

/// Result of removing a single tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The user has a subscription, but not for this (room, slot)
    NotFound,
    /// The user has no subscription at all
    NoSubscription,
}

/// Immutable view of every subscription at one instant.
///
/// Cheap to clone; iterating it never observes a half-applied mutation and it
/// can be walked any number of times.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSnapshot {
    users: Arc<Vec<Subscription>>,
}

impl SubscriptionSnapshot {
    /// Every (user, room, slot) in subscription order
    pub fn iter(&self) -> impl Iterator<Item = TrackedSlot> + '_ {
        self.users.iter().flat_map(|sub| {
            sub.trackers.iter().map(move |tracker| TrackedSlot {
                user_id: sub.user_id,
                username: sub.username.clone(),
                tracker: tracker.clone(),
            })
        })
    }

    pub fn users(&self) -> &[Subscription] {
        &self.users
    }

    pub fn get(&self, user_id: UserId) -> Option<&Subscription> {
        self.users.iter().find(|s| s.user_id == user_id)
    }

    pub fn contains(&self, user_id: UserId, tracker: &Tracker) -> bool {
        self.get(user_id).is_some_and(|s| s.contains(tracker))
    }

    /// Total number of trackers across all users
    pub fn tracker_count(&self) -> usize {
        self.users.iter().map(|s| s.trackers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker_count() == 0
    }
}

/// Durable subscription registry.
///
/// Every mutation is applied to the latest stored document under the
/// storage's exclusive lock, so commands running in separate processes never
/// overwrite each other. Mutations are flushed before they become visible; a
/// failed flush leaves the in-memory view untouched.
pub struct SubscriptionStore {
    storage: Box<dyn Storage<SubscriptionFile>>,
    current: RwLock<SubscriptionSnapshot>,
}

impl SubscriptionStore {
    /// Load existing subscriptions from `storage`
    pub fn open(storage: Box<dyn Storage<SubscriptionFile>>) -> Result<Self, StorageError> {
        let users = read_users(storage.as_ref())?;
        Ok(Self {
            storage,
            current: RwLock::new(SubscriptionSnapshot {
                users: Arc::new(users),
            }),
        })
    }

    /// Re-read storage, picking up changes written by another process
    pub async fn reload(&self) -> Result<(), StorageError> {
        let mut guard = self.current.write().await;
        let users = read_users(self.storage.as_ref())?;
        *guard = SubscriptionSnapshot {
            users: Arc::new(users),
        };
        Ok(())
    }

    /// Track `tracker` for `user_id`.
    ///
    /// Returns `true` if it was newly added, `false` if the user already
    /// tracked it. The stored username is refreshed either way.
    pub async fn add_tracker(
        &self,
        user_id: UserId,
        username: &str,
        tracker: Tracker,
    ) -> Result<bool, StorageError> {
        self.mutate(|users| match users.iter_mut().find(|s| s.user_id == user_id) {
            Some(sub) => {
                let added = !sub.contains(&tracker);
                let renamed = sub.username != username;
                sub.username = username.to_string();
                if added {
                    sub.trackers.push(tracker.clone());
                }
                (added, added || renamed)
            }
            None => {
                users.push(Subscription {
                    user_id,
                    username: username.to_string(),
                    trackers: vec![tracker.clone()],
                });
                (true, true)
            }
        })
        .await
    }

    /// Stop tracking one (room, slot) for `user_id`.
    ///
    /// The user's record is kept even when its last tracker goes away.
    pub async fn remove_tracker(
        &self,
        user_id: UserId,
        tracker: &Tracker,
    ) -> Result<RemoveOutcome, StorageError> {
        self.mutate(|users| {
            let Some(sub) = users.iter_mut().find(|s| s.user_id == user_id) else {
                return (RemoveOutcome::NoSubscription, false);
            };

            let before = sub.trackers.len();
            sub.trackers.retain(|t| t != tracker);
            if sub.trackers.len() == before {
                (RemoveOutcome::NotFound, false)
            } else {
                (RemoveOutcome::Removed, true)
            }
        })
        .await
    }

    /// Delete the user's whole subscription record. Returns whether one existed.
    pub async fn remove_all(&self, user_id: UserId) -> Result<bool, StorageError> {
        self.mutate(|users| {
            let before = users.len();
            users.retain(|s| s.user_id != user_id);
            let removed = users.len() != before;
            (removed, removed)
        })
        .await
    }

    /// Snapshot of all subscriptions for a poll pass
    pub async fn list_all(&self) -> SubscriptionSnapshot {
        self.current.read().await.clone()
    }

    pub async fn get(&self, user_id: UserId) -> Option<Subscription> {
        self.current.read().await.get(user_id).cloned()
    }

    /// Apply `apply` to the latest stored subscriptions and flush the result.
    ///
    /// `apply` returns its outcome and whether it changed anything. It may run
    /// twice when the first flush fails.
    async fn mutate<R>(
        &self,
        mut apply: impl FnMut(&mut Vec<Subscription>) -> (R, bool),
    ) -> Result<R, StorageError> {
        let mut guard = self.current.write().await;

        let mut outcome = None;
        let mut change = |doc: &mut Option<SubscriptionFile>| {
            let (mut users, unmatched) = split(doc.take().unwrap_or_default());
            let (value, changed) = apply(&mut users);
            outcome = Some(value);
            *doc = Some(assemble(&users, unmatched));
            changed
        };
        let latest = retry_once("Saving subscriptions", || self.storage.update(&mut change))?;

        let (users, _) = split(latest.unwrap_or_default());
        *guard = SubscriptionSnapshot {
            users: Arc::new(users),
        };
        outcome.ok_or_else(|| StorageError::Unavailable("subscription update did not run".to_string()))
    }
}

fn read_users(storage: &dyn Storage<SubscriptionFile>) -> Result<Vec<Subscription>, StorageError> {
    let file = retry_once("Loading subscriptions", || storage.load())?.unwrap_or_default();
    Ok(split(file).0)
}

/// Separate persisted records into subscriptions and records without a user
/// id, folding duplicate users and trackers together.
///
/// Records without a user id come from files written by older versions. They
/// are not polled but are carried through every save unchanged.
fn split(file: SubscriptionFile) -> (Vec<Subscription>, Vec<SubscriptionRecord>) {
    let mut users: Vec<Subscription> = Vec::new();
    let mut unmatched = Vec::new();

    for record in file.users {
        let Some(user_id) = record.user_id else {
            tracing::debug!(
                "Ignoring subscription for {:?} without a user id",
                record.username
            );
            unmatched.push(record);
            continue;
        };

        let index = match users.iter().position(|s| s.user_id == user_id) {
            Some(i) => i,
            None => {
                users.push(Subscription {
                    user_id,
                    username: record.username.clone(),
                    trackers: Vec::new(),
                });
                users.len() - 1
            }
        };

        let sub = &mut users[index];
        for tracker in record.trackers {
            if tracker.room.is_empty() || tracker.slot.is_empty() {
                continue;
            }
            if !sub.contains(&tracker) {
                sub.trackers.push(tracker);
            }
        }
    }

    (users, unmatched)
}

fn assemble(users: &[Subscription], unmatched: Vec<SubscriptionRecord>) -> SubscriptionFile {
    let mut records: Vec<SubscriptionRecord> = users.iter().map(SubscriptionRecord::from).collect();
    records.extend(unmatched);
    SubscriptionFile { users: records }
}
