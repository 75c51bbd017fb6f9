use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable chat-platform identifier of a subscriber (a Discord snowflake)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single (room, slot) pair on the Archipelago tracker
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tracker {
    pub room: String,
    pub slot: String,
}

impl Tracker {
    pub fn new(room: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            slot: slot.into(),
        }
    }
}

impl fmt::Display for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room, self.slot)
    }
}

/// Everything one user has asked to be notified about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub user_id: UserId,
    pub username: String,
    /// Unique per user, kept in insertion order
    pub trackers: Vec<Tracker>,
}

impl Subscription {
    pub fn contains(&self, tracker: &Tracker) -> bool {
        self.trackers.iter().any(|t| t == tracker)
    }
}

/// One (user, room, slot) row yielded when walking all subscriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSlot {
    pub user_id: UserId,
    pub username: String,
    pub tracker: Tracker,
}

/// An item row as scraped from the remote tracker. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub name: String,
    /// "Last Order Received" column
    pub sequence: u64,
}

impl RemoteItem {
    pub fn new(name: impl Into<String>, sequence: u64) -> Self {
        Self {
            name: name.into(),
            sequence,
        }
    }
}

/// An item waiting to be announced to the subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedItem {
    pub name: String,
    #[serde(rename = "lastOrderReceived")]
    pub sequence: u64,
}

impl From<RemoteItem> for ReceivedItem {
    fn from(item: RemoteItem) -> Self {
        Self {
            name: item.name,
            sequence: item.sequence,
        }
    }
}

/// Polling state of one tracker for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    #[serde(flatten)]
    pub tracker: Tracker,
    /// High-water mark; never decreases between polls
    #[serde(rename = "lastOrderReceived")]
    pub last_order_received: u64,
    /// Items newer than the mark observed by the previous poll
    #[serde(rename = "items", default)]
    pub pending_items: Vec<ReceivedItem>,
    /// Time of the last successful fetch
    #[serde(
        rename = "lastChecked",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_checked: Option<DateTime<Utc>>,
}

impl TrackerState {
    pub fn has_pending(&self) -> bool {
        !self.pending_items.is_empty()
    }
}

/// A resolved delivery target on the messaging channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: UserId,
    /// Channel-specific handle (a DM channel id for Discord)
    pub handle: String,
}
