//! Paced delivery of pending tracker items.
//!
//! One message per (user, room, slot) with pending items. Consecutive sends
//! across the whole batch are spaced by at least `min_interval`, regardless
//! of which user they go to.

use super::format_notification;
use crate::data::{Tracker, UserId};
use crate::integrations::Messenger;
use crate::store::TrackerStateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one dispatch batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<(UserId, Tracker)>,
    /// Users whose recipient could not be resolved; nothing was sent to them
    pub unresolved: Vec<UserId>,
    pub failed: Vec<(UserId, Tracker)>,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.unresolved.is_empty() && self.failed.is_empty()
    }

    /// Fold another batch's outcome into this one
    pub fn extend(&mut self, other: DispatchReport) {
        self.delivered.extend(other.delivered);
        self.unresolved.extend(other.unresolved);
        self.failed.extend(other.failed);
    }
}

pub struct NotificationDispatcher {
    messenger: Arc<dyn Messenger>,
    min_interval: Duration,
}

impl NotificationDispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, min_interval: Duration) -> Self {
        Self {
            messenger,
            min_interval,
        }
    }

    /// Send every pending tracker in `states`, clearing each one after its
    /// message goes out.
    ///
    /// Failures are isolated: an unresolvable user skips only that user, a
    /// failed send leaves only that tracker pending.
    pub async fn dispatch(&self, states: &TrackerStateStore) -> DispatchReport {
        let pending = states.pending_by_user().await;
        let mut report = DispatchReport::default();
        let mut last_send: Option<Instant> = None;

        for (user_id, trackers) in pending {
            let recipient = match self.messenger.resolve_recipient(user_id).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Skipping notifications for {}: {}", user_id, e);
                    report.unresolved.push(user_id);
                    continue;
                }
            };

            for state in trackers {
                if let Some(last) = last_send {
                    tokio::time::sleep_until(last + self.min_interval).await;
                }

                let message = format_notification(&state.tracker, &state.pending_items);
                let result = self.messenger.send(&recipient, &message).await;
                last_send = Some(Instant::now());

                match result {
                    Ok(()) => {
                        states.clear_pending(user_id, &state.tracker).await;
                        tracing::info!(
                            user_id = %user_id,
                            room = %state.tracker.room,
                            slot = %state.tracker.slot,
                            items = state.pending_items.len(),
                            "Sent notification"
                        );
                        report.delivered.push((user_id, state.tracker));
                    }
                    Err(e) => {
                        tracing::warn!("Notification for {} on {} failed: {}", user_id, state.tracker, e);
                        report.failed.push((user_id, state.tracker));
                    }
                }
            }
        }

        report
    }
}
