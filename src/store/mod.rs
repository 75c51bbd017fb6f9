//! Persistence for subscriptions and tracker state.
//!
//! Both stores hold their state in memory and flush a full snapshot through a
//! [`Storage`] backend after every mutation. The JSON file backend keeps the
//! on-disk layout of `trackers_to_scrape.json` and `recent_checks.json` so
//! existing data files load unchanged.

pub mod subscriptions;
pub mod tracker_state;

pub use subscriptions::{RemoveOutcome, SubscriptionSnapshot, SubscriptionStore};
pub use tracker_state::TrackerStateStore;

use crate::error::StorageError;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Load/save contract shared by every backend.
///
/// `save` must replace the previous snapshot atomically: a reader sees either
/// the old snapshot or the new one, never a mix.
pub trait Storage<T>: Send + Sync {
    /// Returns `None` when nothing has been saved yet
    fn load(&self) -> Result<Option<T>, StorageError>;

    fn save(&self, snapshot: &T) -> Result<(), StorageError>;

    /// Read the latest snapshot, let `change` edit it and save the result,
    /// with no other writer able to interleave.
    ///
    /// `change` returns whether it modified the document; nothing is written
    /// when it returns `false`. Returns the document as it now stands.
    fn update(
        &self,
        change: &mut dyn FnMut(&mut Option<T>) -> bool,
    ) -> Result<Option<T>, StorageError>;
}

impl<T, S> Storage<T> for Arc<S>
where
    S: Storage<T> + ?Sized,
{
    fn load(&self) -> Result<Option<T>, StorageError> {
        (**self).load()
    }

    fn save(&self, snapshot: &T) -> Result<(), StorageError> {
        (**self).save(snapshot)
    }

    fn update(
        &self,
        change: &mut dyn FnMut(&mut Option<T>) -> bool,
    ) -> Result<Option<T>, StorageError> {
        (**self).update(change)
    }
}

// =============================================================================
// JSON file backend
// =============================================================================

/// Pretty-printed JSON document on disk.
///
/// Writes go to a temp file that is synced and renamed over the target while
/// an exclusive lock is held on a `.lock` side file. [`Storage::update`]
/// holds that lock across the read as well, so separate processes sharing
/// the file never lose each other's changes.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn open_lock(&self) -> Result<File, StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let lock_path = self.sibling(".lock");
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| StorageError::Lock {
                path: lock_path,
                source,
            })
    }

    fn lock_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Lock {
            path: self.path.clone(),
            source,
        }
    }

    /// Caller must hold the lock
    fn read_document<T: DeserializeOwned>(&self) -> Result<Option<T>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut content = String::new();
        File::open(&self.path)
            .and_then(|mut f| f.read_to_string(&mut content))
            .map_err(|e| self.io_err(e))?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StorageError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Caller must hold the exclusive lock
    fn write_document<T: Serialize>(&self, snapshot: &T) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(snapshot)?;

        let tmp_path = self.sibling(".tmp");
        let written = (|| -> std::io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(content.as_bytes())?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(self.io_err(e));
        }
        Ok(())
    }
}

impl<T> Storage<T> for JsonFileStorage
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let lock = self.open_lock()?;
        FileExt::lock_shared(&lock).map_err(|e| self.lock_err(e))?;
        let loaded = self.read_document();
        let _ = FileExt::unlock(&lock);
        loaded
    }

    fn save(&self, snapshot: &T) -> Result<(), StorageError> {
        let lock = self.open_lock()?;
        FileExt::lock_exclusive(&lock).map_err(|e| self.lock_err(e))?;
        let saved = self.write_document(snapshot);
        let _ = FileExt::unlock(&lock);
        saved
    }

    fn update(
        &self,
        change: &mut dyn FnMut(&mut Option<T>) -> bool,
    ) -> Result<Option<T>, StorageError> {
        let lock = self.open_lock()?;
        FileExt::lock_exclusive(&lock).map_err(|e| self.lock_err(e))?;

        let updated = self.read_document::<T>().and_then(|mut doc| {
            if change(&mut doc) {
                if let Some(doc) = &doc {
                    self.write_document(doc)?;
                }
            }
            Ok(doc)
        });

        let _ = FileExt::unlock(&lock);
        updated
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Keeps the last saved snapshot in process memory.
///
/// Saves can be made to fail on demand to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStorage<T> {
    snapshot: Mutex<Option<T>>,
    failures_remaining: AtomicUsize,
    saves: AtomicUsize,
}

impl<T> MemoryStorage<T> {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
            failures_remaining: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn with_snapshot(snapshot: T) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            failures_remaining: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` saves return an error
    pub fn fail_next_saves(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> Result<(), StorageError> {
        let pending_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending_failure {
            return Err(StorageError::Unavailable("injected save failure".to_string()));
        }
        Ok(())
    }

    fn lock_snapshot(&self) -> Result<std::sync::MutexGuard<'_, Option<T>>, StorageError> {
        self.snapshot
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("memory storage poisoned: {e}")))
    }
}

impl<T> Storage<T> for MemoryStorage<T>
where
    T: Clone + Send,
{
    fn load(&self) -> Result<Option<T>, StorageError> {
        Ok(self.lock_snapshot()?.clone())
    }

    fn save(&self, snapshot: &T) -> Result<(), StorageError> {
        self.take_injected_failure()?;

        let mut guard = self.lock_snapshot()?;
        *guard = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update(
        &self,
        change: &mut dyn FnMut(&mut Option<T>) -> bool,
    ) -> Result<Option<T>, StorageError> {
        let mut guard = self.lock_snapshot()?;
        let mut doc = guard.clone();

        if change(&mut doc) {
            if let Some(updated) = &doc {
                self.take_injected_failure()?;
                *guard = Some(updated.clone());
                self.saves.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(doc)
    }
}
