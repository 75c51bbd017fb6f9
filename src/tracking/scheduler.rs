//! Periodic poll passes.
//!
//! A pass walks every subscribed tracker, diffs the fetched rows against the
//! stored mark, persists the new state and hands pending items to the
//! dispatcher. Passes never overlap; the next one starts `interval` after the
//! previous one finished.

use super::diff::advance;
use crate::app::Application;
use crate::data::{RemoteItem, TrackedSlot};
use crate::error::TrackerError;
use crate::notify::DispatchReport;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
}

/// Summary of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub trackers: usize,
    pub fetched: usize,
    pub failed: usize,
    pub new_items: usize,
    pub pruned: usize,
    /// Stopped early because shutdown was requested
    pub cancelled: bool,
    pub dispatch: DispatchReport,
}

enum TrackerOutcome {
    Fetched(TrackedSlot, Vec<RemoteItem>),
    Failed,
    Skipped,
}

/// Clears the polling flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollScheduler {
    app: Arc<Application>,
    interval: Duration,
    polling: AtomicBool,
}

impl PollScheduler {
    pub fn new(app: Arc<Application>) -> Self {
        let interval = app.config().polling.interval();
        Self::with_interval(app, interval)
    }

    pub fn with_interval(app: Arc<Application>, interval: Duration) -> Self {
        Self {
            app,
            interval,
            polling: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.polling.load(Ordering::Acquire) {
            SchedulerState::Polling
        } else {
            SchedulerState::Idle
        }
    }

    /// Poll immediately, then every `interval` after each pass completes,
    /// until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            "Poll scheduler started (interval {}s)",
            self.interval.as_secs()
        );

        self.flush_leftovers().await;

        while !cancel.is_cancelled() {
            match self.run_pass(&cancel).await {
                Ok(report) => tracing::info!(
                    trackers = report.trackers,
                    failed = report.failed,
                    new_items = report.new_items,
                    sent = report.dispatch.sent(),
                    "Poll pass complete"
                ),
                Err(e) => tracing::error!("Poll pass failed: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Poll scheduler stopped");
    }

    /// Deliver leftovers from a previous run, then run a single pass.
    ///
    /// The returned report's dispatch covers both deliveries.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<PassReport, TrackerError> {
        let leftovers = self.flush_leftovers().await;
        let mut report = self.run_pass(cancel).await?;
        report.dispatch.extend(leftovers);
        Ok(report)
    }

    async fn flush_leftovers(&self) -> DispatchReport {
        match self.deliver_leftovers().await {
            Ok(report) => {
                if report.sent() > 0 {
                    tracing::info!(
                        "Delivered {} notifications left from a previous run",
                        report.sent()
                    );
                }
                report
            }
            Err(e) => {
                tracing::error!("Failed to deliver leftover notifications: {}", e);
                DispatchReport::default()
            }
        }
    }

    /// Send anything still pending in persisted state, e.g. after a crash
    /// between persisting a pass and dispatching it.
    pub async fn deliver_leftovers(&self) -> Result<DispatchReport, TrackerError> {
        let _guard = PassGuard::acquire(&self.polling).ok_or(TrackerError::PassInProgress)?;

        let report = self.app.dispatcher().dispatch(self.app.states()).await;
        if report.sent() > 0 {
            self.app.states().persist().await?;
        }
        Ok(report)
    }

    /// Run a single pass.
    ///
    /// Fails with `PassInProgress` if another pass is running, and with a
    /// storage error only if tracker state could not be flushed at all.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassReport, TrackerError> {
        let _guard = PassGuard::acquire(&self.polling).ok_or(TrackerError::PassInProgress)?;
        let app = &self.app;

        if let Err(e) = app.subscriptions().reload().await {
            tracing::warn!("Could not reload subscriptions, using in-memory copy: {}", e);
        }
        let snapshot = app.subscriptions().list_all().await;

        let mut report = PassReport {
            trackers: snapshot.tracker_count(),
            ..Default::default()
        };

        let fetcher = app.fetcher();
        let timeout = app.config().polling.fetch_timeout();
        let concurrency = app.config().polling.concurrency.max(1);

        let outcomes: Vec<TrackerOutcome> = stream::iter(snapshot.iter())
            .map(|slot| async move {
                if cancel.is_cancelled() {
                    return TrackerOutcome::Skipped;
                }
                let fetched = tokio::time::timeout(timeout, fetcher.fetch(&slot.tracker)).await;
                match fetched {
                    Ok(Ok(items)) => TrackerOutcome::Fetched(slot, items),
                    Ok(Err(e)) => {
                        tracing::warn!("Skipping {} for {}: {}", slot.tracker, slot.user_id, e);
                        TrackerOutcome::Failed
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Skipping {} for {}: fetch timed out after {}s",
                            slot.tracker,
                            slot.user_id,
                            timeout.as_secs()
                        );
                        TrackerOutcome::Failed
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let states = app.states();
        for outcome in outcomes {
            match outcome {
                TrackerOutcome::Fetched(slot, items) => {
                    report.fetched += 1;
                    let previous = states.get(slot.user_id, &slot.tracker).await;
                    if let Some(next) = advance(previous.as_ref(), &slot.tracker, &items, Utc::now()) {
                        if !next.pending_items.is_empty() {
                            tracing::debug!(
                                "{} new items on {} for {}",
                                next.pending_items.len(),
                                slot.tracker,
                                slot.user_id
                            );
                        }
                        report.new_items += next.pending_items.len();
                        states.upsert(slot.user_id, &slot.username, next).await;
                    }
                }
                TrackerOutcome::Failed => report.failed += 1,
                TrackerOutcome::Skipped => report.cancelled = true,
            }
        }

        report.pruned = states.prune(&snapshot).await;

        let flushed = states.persist().await;
        if let Err(e) = &flushed {
            tracing::error!("Failed to persist tracker state: {}", e);
        }

        if report.cancelled {
            tracing::info!("Shutdown requested, pending notifications kept for next start");
            return flushed.map(|_| report).map_err(TrackerError::from);
        }

        report.dispatch = app.dispatcher().dispatch(states).await;

        if flushed.is_err() || report.dispatch.sent() > 0 {
            states.persist().await.map_err(|e| {
                tracing::error!("Failed to persist tracker state after dispatch: {}", e);
                TrackerError::from(e)
            })?;
        }

        Ok(report)
    }
}
