//! Error types for the tracking pipeline.

use crate::data::{Tracker, UserId};
use std::path::PathBuf;
use thiserror::Error;

/// Failure reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Main error type for tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Fetch failed for {tracker}: {reason}")]
    Fetch { tracker: Tracker, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Could not resolve recipient {user_id}: {reason}")]
    RecipientUnresolved { user_id: UserId, reason: String },

    #[error("Failed to send to {user_id}: {reason}")]
    Send { user_id: UserId, reason: String },

    #[error("Invalid command: {0}")]
    CommandValidation(String),

    #[error("A poll pass is already running")]
    PassInProgress,
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
