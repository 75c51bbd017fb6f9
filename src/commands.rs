//! Chat command adapter.
//!
//! Turns a chat line such as `!ap add <room> <slot>` into a [`Command`], runs
//! it against the [`SubscriptionStore`] and renders the reply text. Replies
//! never carry internal error details.

use crate::data::{Tracker, UserId};
use crate::error::TrackerError;
use crate::store::{RemoveOutcome, SubscriptionStore};

pub const PREFIX: &str = "!ap";

pub const USAGE_REPLY: &str = "Invalid command. Use !ap add/remove [room] [slot] or !ap remove all.";

pub const STORAGE_FAILURE_REPLY: &str =
    "Something went wrong while saving your trackers. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddTracker(Tracker),
    RemoveTracker(Tracker),
    RemoveAll,
}

impl Command {
    /// Parse a chat line.
    ///
    /// Returns `None` when the line is not addressed to the bot, and a
    /// `CommandValidation` error when it is but has the wrong shape.
    pub fn parse(line: &str) -> Option<Result<Command, TrackerError>> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.first() != Some(&PREFIX) {
            return None;
        }

        let command = match parts.as_slice() {
            [_, "add", room, slot] => Ok(Command::AddTracker(Tracker::new(*room, *slot))),
            [_, "remove", "all"] => Ok(Command::RemoveAll),
            [_, "remove", room, slot] => Ok(Command::RemoveTracker(Tracker::new(*room, *slot))),
            _ => Err(TrackerError::CommandValidation(line.trim().to_string())),
        };
        Some(command)
    }
}

/// Run a parsed command for `user_id` and render the reply
pub async fn execute(
    store: &SubscriptionStore,
    user_id: UserId,
    username: &str,
    command: Command,
) -> String {
    match command {
        Command::AddTracker(tracker) => {
            match store.add_tracker(user_id, username, tracker.clone()).await {
                Ok(true) => {
                    tracing::info!(
                        user_id = %user_id,
                        username,
                        room = %tracker.room,
                        slot = %tracker.slot,
                        "Added tracker"
                    );
                    format!("Added {} {} for {}.", tracker.room, tracker.slot, username)
                }
                Ok(false) => format!(
                    "Already tracking {} {} for {}.",
                    tracker.room, tracker.slot, username
                ),
                Err(e) => storage_failure(user_id, e),
            }
        }
        Command::RemoveTracker(tracker) => match store.remove_tracker(user_id, &tracker).await {
            Ok(RemoveOutcome::Removed) => {
                tracing::info!(
                    user_id = %user_id,
                    username,
                    room = %tracker.room,
                    slot = %tracker.slot,
                    "Removed tracker"
                );
                format!("Removed {} {} for {}.", tracker.room, tracker.slot, username)
            }
            Ok(RemoveOutcome::NotFound) => format!(
                "No entry found for {} {} for {}.",
                tracker.room, tracker.slot, username
            ),
            Ok(RemoveOutcome::NoSubscription) => format!("No entries found for {}.", username),
            Err(e) => storage_failure(user_id, e),
        },
        Command::RemoveAll => match store.remove_all(user_id).await {
            Ok(true) => {
                tracing::info!(user_id = %user_id, username, "Removed all trackers");
                format!("Removed all tracked slots for {}.", username)
            }
            Ok(false) => format!("No entries found for {}.", username),
            Err(e) => storage_failure(user_id, e),
        },
    }
}

/// Parse and execute one chat line. `None` means the line was not a command.
pub async fn handle_line(
    store: &SubscriptionStore,
    user_id: UserId,
    username: &str,
    line: &str,
) -> Option<String> {
    match Command::parse(line)? {
        Ok(command) => Some(execute(store, user_id, username, command).await),
        Err(e) => {
            tracing::debug!("Rejected command from {}: {}", user_id, e);
            Some(USAGE_REPLY.to_string())
        }
    }
}

fn storage_failure(user_id: UserId, e: crate::error::StorageError) -> String {
    tracing::error!("Failed to save subscriptions for {}: {}", user_id, e);
    STORAGE_FAILURE_REPLY.to_string()
}
