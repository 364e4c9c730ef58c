//! Startup sweep and graceful shutdown.

use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::TorrentRelay;

/// How long shutdown waits for cancelled downloads to unwind
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl TorrentRelay {
    /// Remove leftover request directories from a previous run
    pub(crate) async fn sweep_work_dir(&self) -> Result<usize> {
        self.cleanup.sweep(&self.config.download.work_dir).await
    }

    /// Gracefully shut down the relay
    ///
    /// 1. Stops accepting new requests
    /// 2. Cancels active downloads and waits (up to 30 seconds) for them to unwind
    /// 3. Removes every working directory still awaiting its grace period
    /// 4. Marks a clean shutdown in the database and closes the quota store
    ///
    /// Steps that fail are logged and the sequence continues.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.state.accepting_new.store(false, Ordering::SeqCst);

        self.cancel_all().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_downloads()).await {
            Ok(()) => tracing::info!("All active downloads stopped"),
            Err(_) => tracing::warn!(
                "Timeout waiting for downloads to stop, proceeding with shutdown"
            ),
        }

        let flushed = self.cleanup.flush().await;
        tracing::info!(flushed, "Pending cleanups flushed");

        if let Some(db) = &self.db {
            if let Err(e) = db.set_clean_shutdown().await {
                tracing::error!(error = %e, "Failed to mark clean shutdown in database");
            } else {
                tracing::info!("Marked clean shutdown in database");
            }
        }

        self.emit_event(Event::Shutdown);
        self.quota.close().await;

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Signal cancellation to every downloading request
    async fn cancel_all(&self) {
        let active = self.state.active_downloads.lock().await;
        tracing::debug!(active_count = active.len(), "Cancelling active downloads");

        for (id, token) in active.iter() {
            tracing::debug!(request_id = %id, "Signaling cancellation");
            token.cancel();
        }
    }

    async fn wait_for_active_downloads(&self) {
        loop {
            let active_count = self.state.active_downloads.lock().await.len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for active downloads to stop");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
