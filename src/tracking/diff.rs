//! High-water-mark diffing of fetched tracker rows.
//!
//! Pure functions: the same inputs always produce the same delta, and the
//! returned mark is never lower than the one passed in.

use crate::data::{ReceivedItem, RemoteItem, Tracker, TrackerState};
use chrono::{DateTime, Utc};

/// Items newer than the previous mark, plus the advanced mark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub new_items: Vec<RemoteItem>,
    pub mark: u64,
}

/// Compare a fetch against the previous high-water mark.
///
/// Keeps fetch order for the new items. An empty or entirely stale fetch
/// yields no items and leaves the mark where it was.
pub fn compute_delta(previous_mark: u64, fetched: &[RemoteItem]) -> Delta {
    let new_items: Vec<RemoteItem> = fetched
        .iter()
        .filter(|item| item.sequence > previous_mark)
        .cloned()
        .collect();

    let mark = fetched
        .iter()
        .map(|item| item.sequence)
        .fold(previous_mark, u64::max);

    Delta { new_items, mark }
}

/// Mark to seed a tracker with on its first successful fetch.
///
/// `None` for an empty fetch, so no state is created from nothing.
pub fn seed_mark(fetched: &[RemoteItem]) -> Option<u64> {
    fetched.iter().map(|item| item.sequence).max()
}

/// Produce the next state of a tracker from its previous state and a fetch.
///
/// - First fetch: the mark is seeded silently, nothing is pending.
/// - Later fetches: pending is replaced by the delta (possibly empty).
/// - An empty fetch leaves an existing state alone and creates none.
pub fn advance(
    previous: Option<&TrackerState>,
    tracker: &Tracker,
    fetched: &[RemoteItem],
    checked_at: DateTime<Utc>,
) -> Option<TrackerState> {
    match previous {
        None => seed_mark(fetched).map(|mark| TrackerState {
            tracker: tracker.clone(),
            last_order_received: mark,
            pending_items: Vec::new(),
            last_checked: Some(checked_at),
        }),
        Some(_) if fetched.is_empty() => None,
        Some(prev) => {
            let delta = compute_delta(prev.last_order_received, fetched);
            Some(TrackerState {
                tracker: tracker.clone(),
                last_order_received: delta.mark,
                pending_items: delta.new_items.into_iter().map(ReceivedItem::from).collect(),
                last_checked: Some(checked_at),
            })
        }
    }
}
