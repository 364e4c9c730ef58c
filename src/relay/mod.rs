//! Request orchestration split into focused submodules.
//!
//! The `TorrentRelay` struct and its methods are organized by domain:
//! - [`request`] - The per-request pipeline (quota, descriptor, download, delivery)
//! - [`monitor`] - Bounded, cancellable progress polling
//! - [`commands`] - Inbound dispatch and chat commands
//! - [`lifecycle`] - Startup sweep and graceful shutdown

mod commands;
mod lifecycle;
mod monitor;
mod request;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use commands::Inbound;

use crate::cleanup::CleanupScheduler;
use crate::config::Config;
use crate::db::Database;
use crate::delivery::{DeliveryRouter, HttpUploader, Uploader};
use crate::engine::{Aria2Engine, DownloadEngine};
use crate::error::{Error, Result};
use crate::quota::QuotaStore;
use crate::types::{Event, RequestId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Admission and concurrency state shared by all requests
#[derive(Clone)]
pub(crate) struct RequestState {
    /// Bounds simultaneous engine sessions (max_concurrent_downloads)
    pub(crate) concurrent_limit: Arc<tokio::sync::Semaphore>,
    /// Cancellation tokens of requests that are downloading
    pub(crate) active_downloads: Arc<tokio::sync::Mutex<HashMap<RequestId, CancellationToken>>>,
    /// Admitted but unfinished requests per user, counted against the quota
    pub(crate) in_flight: Arc<std::sync::Mutex<HashMap<UserId, u32>>>,
    /// Cleared during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl RequestState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            concurrent_limit: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
            active_downloads: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            in_flight: Arc::new(std::sync::Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Main relay instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TorrentRelay {
    /// Database backing the quota store, when the relay owns one
    pub db: Option<Arc<Database>>,
    pub(crate) config: Arc<Config>,
    pub(crate) quota: Arc<dyn QuotaStore>,
    pub(crate) engine: Arc<dyn DownloadEngine>,
    pub(crate) router: Arc<DeliveryRouter>,
    pub(crate) cleanup: CleanupScheduler,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    pub(crate) state: RequestState,
}

impl TorrentRelay {
    /// Create a relay with the production components
    ///
    /// This initializes:
    /// - The SQLite usage ledger (and merges the legacy JSON ledger if configured)
    /// - The aria2 JSON-RPC engine client
    /// - The HTTP uploader for oversized files
    /// - The work root, swept of leftovers from a previous run
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;

        if db.was_unclean_shutdown().await? {
            tracing::warn!("Previous run did not shut down cleanly");
        }
        db.set_clean_start().await?;

        if let Some(legacy) = &config.persistence.legacy_usage_file {
            if legacy.exists() {
                db.import_usage_json(legacy).await?;
            } else {
                tracing::debug!(path = %legacy.display(), "No legacy usage ledger to import");
            }
        }

        let db = Arc::new(db);
        let engine: Arc<dyn DownloadEngine> = Arc::new(Aria2Engine::new(&config.engine)?);
        let uploader: Arc<dyn Uploader> = Arc::new(HttpUploader::new(&config.delivery)?);
        let quota: Arc<dyn QuotaStore> = db.clone();

        let mut relay = Self::with_components(config, quota, engine, uploader).await?;
        relay.db = Some(db);

        if relay.config.cleanup.sweep_on_start {
            relay.sweep_work_dir().await?;
        }

        Ok(relay)
    }

    /// Create a relay from caller-supplied components
    ///
    /// Used by embedders with their own ledger or engine, and by tests.
    pub async fn with_components(
        config: Config,
        quota: Arc<dyn QuotaStore>,
        engine: Arc<dyn DownloadEngine>,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.work_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create work directory '{}': {}",
                        config.download.work_dir.display(),
                        e
                    ),
                ))
            })?;

        // Buffer sized for progress bursts from several concurrent requests
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let router = Arc::new(DeliveryRouter::new(uploader, config.delivery.retry.clone()));
        let state = RequestState::new(config.download.max_concurrent_downloads);

        tracing::info!(
            engine = engine.name(),
            max_free_downloads = config.bot.max_free_downloads,
            work_dir = %config.download.work_dir.display(),
            "Torrent relay initialized"
        );

        Ok(Self {
            db: None,
            config: Arc::new(config),
            quota,
            engine,
            router,
            cleanup: CleanupScheduler::new(),
            event_tx,
            state,
        })
    }

    /// Subscribe to relay events
    ///
    /// Each subscriber receives every event emitted after it subscribed.
    /// Slow subscribers that fall more than 1000 events behind observe
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The deferred cleanup scheduler
    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.cleanup
    }

    /// Whether new requests are being accepted
    pub fn is_accepting(&self) -> bool {
        self.state.accepting_new.load(Ordering::SeqCst)
    }

    /// Number of requests currently downloading
    pub async fn active_downloads(&self) -> usize {
        self.state.active_downloads.lock().await.len()
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
