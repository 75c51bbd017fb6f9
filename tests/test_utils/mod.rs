//! Test utilities and fakes for apwatch tests

#![allow(dead_code)]

use apwatch::app::Application;
use apwatch::config::Config;
use apwatch::data::{Recipient, ReceivedItem, RemoteItem, Tracker, TrackerState, UserId};
use apwatch::error::TrackerError;
use apwatch::integrations::{Messenger, RemoteStateFetcher};
use apwatch::store::subscriptions::SubscriptionFile;
use apwatch::store::tracker_state::TrackerStateFile;
use apwatch::store::{MemoryStorage, SubscriptionStore, TrackerStateStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub fn items(rows: &[(&str, u64)]) -> Vec<RemoteItem> {
    rows.iter().map(|(n, s)| RemoteItem::new(*n, *s)).collect()
}

pub fn pending_state(room: &str, slot: &str, mark: u64, pending: &[(&str, u64)]) -> TrackerState {
    TrackerState {
        tracker: Tracker::new(room, slot),
        last_order_received: mark,
        pending_items: pending
            .iter()
            .map(|(name, seq)| ReceivedItem {
                name: name.to_string(),
                sequence: *seq,
            })
            .collect(),
        last_checked: None,
    }
}

/// Config tuned for fast tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.polling.interval_secs = 3600;
    config.polling.fetch_timeout_secs = 1;
    config.notifications.min_interval_ms = 0;
    config
}

// =============================================================================
// Fetcher
// =============================================================================

type Scripted = Result<Vec<RemoteItem>, String>;

/// Returns queued results per tracker; an exhausted queue yields an empty list
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<Tracker, VecDeque<Scripted>>>,
    calls: Mutex<Vec<Tracker>>,
    delay: Mutex<Option<Duration>>,
    cancel_on_fetch: Mutex<Option<CancellationToken>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_items(&self, tracker: &Tracker, rows: &[(&str, u64)]) {
        self.push(tracker, Ok(items(rows)));
    }

    pub fn push_error(&self, tracker: &Tracker, reason: &str) {
        self.push(tracker, Err(reason.to_string()));
    }

    fn push(&self, tracker: &Tracker, result: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(tracker.clone())
            .or_default()
            .push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Cancel `token` as soon as the next fetch starts
    pub fn cancel_on_fetch(&self, token: CancellationToken) {
        *self.cancel_on_fetch.lock().unwrap() = Some(token);
    }

    pub fn calls(&self) -> Vec<Tracker> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStateFetcher for ScriptedFetcher {
    async fn fetch(&self, tracker: &Tracker) -> Result<Vec<RemoteItem>, TrackerError> {
        self.calls.lock().unwrap().push(tracker.clone());

        let token = self.cancel_on_fetch.lock().unwrap().take();
        if let Some(token) = token {
            token.cancel();
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(tracker)
            .and_then(|q| q.pop_front());

        match next {
            Some(Ok(items)) => Ok(items),
            Some(Err(reason)) => Err(TrackerError::Fetch {
                tracker: tracker.clone(),
                reason,
            }),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// Messenger
// =============================================================================

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub user_id: UserId,
    pub content: String,
    pub at: Instant,
}

/// Records every send; selected users can be made unreachable
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    unreachable: Mutex<HashSet<UserId>>,
    failing_sends: Mutex<HashSet<UserId>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_unreachable(&self, user_id: UserId) {
        self.unreachable.lock().unwrap().insert(user_id);
    }

    pub fn fail_sends_to(&self, user_id: UserId) {
        self.failing_sends.lock().unwrap().insert(user_id);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn resolve_recipient(&self, user_id: UserId) -> Result<Recipient, TrackerError> {
        if self.unreachable.lock().unwrap().contains(&user_id) {
            return Err(TrackerError::RecipientUnresolved {
                user_id,
                reason: "unknown user".to_string(),
            });
        }
        Ok(Recipient {
            user_id,
            handle: format!("dm-{}", user_id),
        })
    }

    async fn send(&self, recipient: &Recipient, content: &str) -> Result<(), TrackerError> {
        if self.failing_sends.lock().unwrap().contains(&recipient.user_id) {
            return Err(TrackerError::Send {
                user_id: recipient.user_id,
                reason: "channel closed".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            user_id: recipient.user_id,
            content: content.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }
}

// =============================================================================
// Application harness
// =============================================================================

pub struct Harness {
    pub app: Arc<Application>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub messenger: Arc<RecordingMessenger>,
    pub subscription_storage: Arc<MemoryStorage<SubscriptionFile>>,
    pub state_storage: Arc<MemoryStorage<TrackerStateFile>>,
}

impl Harness {
    pub async fn new(config: Config) -> Self {
        Self::with_state(config, TrackerStateFile::default()).await
    }

    pub async fn with_state(config: Config, state: TrackerStateFile) -> Self {
        let subscription_storage: Arc<MemoryStorage<SubscriptionFile>> =
            Arc::new(MemoryStorage::new());
        let state_storage: Arc<MemoryStorage<TrackerStateFile>> =
            Arc::new(MemoryStorage::with_snapshot(state));
        let fetcher = Arc::new(ScriptedFetcher::new());
        let messenger = Arc::new(RecordingMessenger::new());

        let subscriptions = SubscriptionStore::open(Box::new(subscription_storage.clone())).unwrap();
        let states = TrackerStateStore::open(Box::new(state_storage.clone())).unwrap();

        let app = Application::new(
            config,
            subscriptions,
            states,
            fetcher.clone(),
            messenger.clone(),
        )
        .await;

        Self {
            app: Arc::new(app),
            fetcher,
            messenger,
            subscription_storage,
            state_storage,
        }
    }

    pub async fn subscribe(&self, user: u64, username: &str, room: &str, slot: &str) {
        self.app
            .subscriptions()
            .add_tracker(UserId(user), username, Tracker::new(room, slot))
            .await
            .unwrap();
    }

    /// Persisted state for one tracker, read back from storage
    pub fn persisted(&self, user: u64, room: &str, slot: &str) -> Option<TrackerState> {
        use apwatch::store::Storage;

        let file = self.state_storage.load().unwrap()?;
        file.entries
            .into_iter()
            .filter(|e| e.user_id == Some(UserId(user)))
            .flat_map(|e| e.trackers)
            .find(|s| s.tracker == Tracker::new(room, slot))
    }
}
