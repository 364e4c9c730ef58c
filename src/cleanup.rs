//! Deferred removal of request working directories
//!
//! After delivery a request's directory is kept for a grace period (so the
//! transport can finish sending inline files) and then removed by a
//! background timer. Timers are keyed by path: a directory has at most one
//! pending removal.

use crate::error::Result;
use crate::types::RequestId;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

struct PendingRemoval {
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingMap = HashMap<PathBuf, PendingRemoval>;

/// Schedules and tracks deferred directory removals
#[derive(Clone, Default)]
pub struct CleanupScheduler {
    pending: Arc<Mutex<PendingMap>>,
    generation: Arc<AtomicU64>,
}

impl CleanupScheduler {
    /// Create a scheduler with no pending removals
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove `path` after `delay`
    ///
    /// Returns `false` without doing anything if a removal for the same path
    /// is already pending. Once that removal has run the path can be
    /// scheduled again. A directory that no longer exists when the timer
    /// fires is not an error.
    pub fn schedule(&self, path: impl Into<PathBuf>, delay: Duration) -> bool {
        let path = path.into();
        let mut pending = lock(&self.pending);

        if pending
            .get(&path)
            .is_some_and(|entry| !entry.handle.is_finished())
        {
            tracing::debug!(path = %path.display(), "Cleanup already pending");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let map = self.pending.clone();
        let task_path = path.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            remove_tree(&task_path).await;

            let mut pending = lock(&map);
            if pending
                .get(&task_path)
                .is_some_and(|entry| entry.generation == generation)
            {
                pending.remove(&task_path);
            }
        });

        pending.insert(path, PendingRemoval { generation, handle });
        true
    }

    /// Remove `path` immediately, cancelling any pending timer for it
    pub async fn remove_now(&self, path: &Path) -> Result<()> {
        if let Some(entry) = lock(&self.pending).remove(path) {
            entry.handle.abort();
        }

        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed working directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of removals that have not run yet
    pub fn pending(&self) -> usize {
        lock(&self.pending)
            .values()
            .filter(|entry| !entry.handle.is_finished())
            .count()
    }

    /// Whether a removal for `path` is pending
    pub fn is_pending(&self, path: &Path) -> bool {
        lock(&self.pending)
            .get(path)
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    /// Cancel every timer and remove the pending directories now
    ///
    /// Used on shutdown so no working directory outlives the process.
    /// Returns the number of directories that were removed.
    pub async fn flush(&self) -> usize {
        let drained: Vec<(PathBuf, PendingRemoval)> = lock(&self.pending).drain().collect();
        if drained.is_empty() {
            return 0;
        }

        let paths: Vec<PathBuf> = drained
            .into_iter()
            .map(|(path, entry)| {
                entry.handle.abort();
                path
            })
            .collect();

        let removed = join_all(paths.iter().map(|p| remove_tree(p)))
            .await
            .into_iter()
            .filter(|removed| *removed)
            .count();

        tracing::info!(removed, "Flushed pending cleanups");
        removed
    }

    /// Remove leftover request directories under `root`
    ///
    /// Run at startup: request directories still under the work root belong
    /// to a previous process (a crash or kill before its timers fired). Only
    /// directories named like a [`RequestId`] are removed; anything else under
    /// the root is not ours and stays. Paths with a pending removal are left
    /// alone. A missing root is not an error.
    pub async fn sweep(&self, root: &Path) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let owned = entry
                .file_name()
                .to_str()
                .is_some_and(RequestId::is_request_dir_name);
            if !owned || !entry.file_type().await?.is_dir() || self.is_pending(&path) {
                if !owned {
                    tracing::debug!(path = %path.display(), "Leaving foreign entry in work root");
                }
                continue;
            }
            if remove_tree(&path).await {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(root = %root.display(), removed, "Swept leftover working directories");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

fn lock(map: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    // A panic while holding the lock leaves the map consistent
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove a directory tree, returning whether anything was removed
async fn remove_tree(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Auto-cleaned working directory");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Working directory already gone");
            false
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove working directory");
            false
        }
    }
}
