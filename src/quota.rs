//! Per-user free download quota
//!
//! The orchestrator only sees the [`QuotaStore`] trait. [`Database`] is the
//! durable implementation; [`MemoryQuotaStore`] keeps counts in memory for
//! tests and embedders that persist usage elsewhere.

use crate::db::Database;
use crate::error::Result;
use crate::types::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Mapping from user to consumed download count
///
/// Counts never decrease. `record_download` must be durable before it
/// returns and must not lose updates under concurrent callers.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Downloads charged to `user` so far (0 for unknown users)
    async fn get_usage(&self, user: &UserId) -> Result<u32>;

    /// Charge one download to `user` and return the new count
    async fn record_download(&self, user: &UserId) -> Result<u32>;

    /// Flush and release the backing store
    async fn close(&self) {}
}

#[async_trait]
impl QuotaStore for Database {
    async fn get_usage(&self, user: &UserId) -> Result<u32> {
        Database::get_usage(self, user.as_str()).await
    }

    async fn record_download(&self, user: &UserId) -> Result<u32> {
        Database::record_download(self, user.as_str()).await
    }

    async fn close(&self) {
        Database::close(self).await;
    }
}

/// In-memory quota store
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    counts: Mutex<HashMap<UserId, u32>>,
}

impl MemoryQuotaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with counts
    pub fn with_counts(counts: impl IntoIterator<Item = (UserId, u32)>) -> Self {
        Self {
            counts: Mutex::new(counts.into_iter().collect()),
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn get_usage(&self, user: &UserId) -> Result<u32> {
        Ok(self.counts.lock().await.get(user).copied().unwrap_or(0))
    }

    async fn record_download(&self, user: &UserId) -> Result<u32> {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(user.clone()).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }
}

/// Whether a user with `used` downloads (plus `in_flight` admitted but
/// unfinished ones) may start another download under `limit`
pub fn has_remaining(used: u32, in_flight: u32, limit: u32) -> bool {
    used.saturating_add(in_flight) < limit
}
