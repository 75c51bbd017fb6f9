pub mod archipelago;
pub mod discord;

use crate::data::{Recipient, RemoteItem, Tracker, UserId};
use crate::error::TrackerError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Source of the current received-items list for a tracker.
///
/// Implementations return an empty list when the page exists but has no
/// readable table; `Err` is reserved for network-level failures.
#[async_trait]
pub trait RemoteStateFetcher: Send + Sync {
    async fn fetch(&self, tracker: &Tracker) -> Result<Vec<RemoteItem>, TrackerError>;
}

/// Outbound channel used to notify subscribers
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Look up where messages for `user_id` should go
    async fn resolve_recipient(&self, user_id: UserId) -> Result<Recipient, TrackerError>;

    async fn send(&self, recipient: &Recipient, content: &str) -> Result<(), TrackerError>;
}

/// Build the HTTP client shared by the fetcher and the messenger
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(5)
        .user_agent(concat!("apwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}
