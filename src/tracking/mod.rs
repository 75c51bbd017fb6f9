//! Polling and change detection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PollScheduler                          │
//! │                                                               │
//! │  SubscriptionStore ──► RemoteStateFetcher (per tracker)       │
//! │                               │                               │
//! │                        diff::advance (pure)                   │
//! │                               │                               │
//! │                       TrackerStateStore ──► persist           │
//! │                               │                               │
//! │                    NotificationDispatcher ──► persist         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod diff;
pub mod scheduler;

pub use diff::{advance, compute_delta, Delta};
pub use scheduler::{PassReport, PollScheduler, SchedulerState};
