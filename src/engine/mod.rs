//! Download engine adapter
//!
//! The peer-to-peer transfer itself is performed by an external engine. The
//! relay drives it through the [`DownloadEngine`] trait, one session per
//! request:
//!
//! - [`DownloadEngine::start_session`] hands the descriptor to the engine and
//!   returns as soon as the engine accepted it
//! - [`DownloadEngine::poll_progress`] takes a cheap snapshot
//! - [`DownloadEngine::stop_session`] releases the engine-side handle
//!
//! The adapter never abandons a session on its own; timeouts and
//! cancellation are the orchestrator's job.
//!
//! [`Aria2Engine`] talks to an aria2 daemon over JSON-RPC.

mod aria2;

pub use aria2::Aria2Engine;

use crate::error::Result;
use crate::torrent::TorrentMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Handle to one running download inside the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    /// Engine-specific handle (the aria2 GID for [`Aria2Engine`])
    pub handle: String,
    /// Directory the engine writes into
    pub save_path: PathBuf,
    /// Torrent name
    pub name: String,
}

/// Progress snapshot of a session
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionProgress {
    /// Completed fraction in `[0.0, 1.0]`
    pub ratio: f64,
    /// Whether every piece has been downloaded and verified
    pub complete: bool,
    /// Bytes downloaded so far
    pub completed_bytes: u64,
    /// Total bytes (0 while the engine has not sized the torrent yet)
    pub total_bytes: u64,
}

impl SessionProgress {
    /// Build a snapshot from byte counts, clamping the ratio into range
    pub fn from_bytes(completed_bytes: u64, total_bytes: u64, complete: bool) -> Self {
        let ratio = if complete {
            1.0
        } else if total_bytes == 0 {
            0.0
        } else {
            (completed_bytes as f64 / total_bytes as f64).clamp(0.0, 1.0)
        };
        Self {
            ratio,
            complete,
            completed_bytes,
            total_bytes,
        }
    }

    /// Progress as a percentage
    pub fn percent(&self) -> f64 {
        self.ratio * 100.0
    }
}

/// Trait for peer-to-peer download engines
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Start downloading `metadata` into `save_path`
    ///
    /// Returns once the engine has accepted the torrent; the transfer runs in
    /// the background.
    async fn start_session(
        &self,
        metadata: &TorrentMetadata,
        save_path: &Path,
    ) -> Result<DownloadSession>;

    /// Current progress of a session
    async fn poll_progress(&self, session: &DownloadSession) -> Result<SessionProgress>;

    /// Release the engine-side state of a session
    ///
    /// Called after completion, timeout or cancellation. Stopping a session
    /// the engine has already forgotten is not an error.
    async fn stop_session(&self, session: &DownloadSession) -> Result<()>;

    /// Engine name for logs
    fn name(&self) -> &str;
}
