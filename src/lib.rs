//! # torrent-relay
//!
//! Backend library for a chat bot that downloads torrents on behalf of users
//! and sends the resulting files back.
//!
//! A user uploads a `.torrent` descriptor; the relay checks their free
//! download quota, validates the descriptor, drives an external BitTorrent
//! engine (aria2 over JSON-RPC) until the download completes or times out,
//! then delivers every output file: small files go back through the chat,
//! large ones are uploaded to a file host and shared as links. The working
//! directory is removed after a grace period.
//!
//! The chat transport is not part of this crate. Embedders feed inbound
//! messages to [`TorrentRelay::handle_inbound`] and implement [`Replier`] to
//! carry answers back.
//!
//! ## Quick Start
//!
//! ```no_run
//! use torrent_relay::{Config, Inbound, Notice, Replier, Result, TorrentRelay, UserId};
//! use std::path::Path;
//!
//! struct Console;
//!
//! #[async_trait::async_trait]
//! impl Replier for Console {
//!     async fn send_text(&self, text: &str) -> Result<()> {
//!         println!("{}", text);
//!         Ok(())
//!     }
//!
//!     async fn send_file(&self, path: &Path, caption: &str) -> Result<()> {
//!         println!("{} ({})", caption, path.display());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let relay = TorrentRelay::new(Config::default()).await?;
//!
//!     let bytes = std::fs::read("ubuntu.torrent")?;
//!     let inbound = Inbound::Document {
//!         file_name: "ubuntu.torrent".into(),
//!         bytes,
//!     };
//!     relay
//!         .handle_inbound(&UserId::from(42_i64), inbound, &Console)
//!         .await?;
//!
//!     relay.shutdown().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Deferred removal of working directories
pub mod cleanup;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Size-based routing of output files
pub mod delivery;
/// Download engine adapters
pub mod engine;
/// Error types
pub mod error;
/// Per-user free download quota
pub mod quota;
/// Request orchestration (decomposed into focused submodules)
pub mod relay;
/// User-facing messages and the reply channel
pub mod reply;
/// Retry logic with exponential backoff
pub mod retry;
/// Torrent descriptor parsing
pub mod torrent;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use cleanup::CleanupScheduler;
pub use config::Config;
pub use db::Database;
pub use delivery::{DeliveryResult, DeliveryRouter, HttpUploader, OutputFile, Uploader};
pub use engine::{Aria2Engine, DownloadEngine, DownloadSession, SessionProgress};
pub use error::{DatabaseError, DownloadError, Error, Result};
pub use quota::{MemoryQuotaStore, QuotaStore};
pub use relay::{Inbound, TorrentRelay};
pub use reply::{Notice, Replier};
pub use torrent::{TorrentMetadata, parse_descriptor};
pub use types::{DownloadSummary, Event, RequestId, Stage, UserId};

/// Helper function to run the relay with graceful signal handling.
///
/// Waits for a termination signal and then calls the relay's `shutdown()` method,
/// which cancels running downloads and removes every working directory.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use torrent_relay::{TorrentRelay, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = Config::default();
///     config.apply_env();
///     let relay = TorrentRelay::new(config).await?;
///
///     // Hand `relay.clone()` to the chat transport, then block until a signal
///     run_with_shutdown(relay).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(relay: TorrentRelay) -> Result<()> {
    wait_for_signal().await;
    relay.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
