//! User-facing notices and the transport seam
//!
//! The relay never talks to a chat platform directly. Every message to the
//! requesting user goes through a [`Replier`] supplied by the transport, and
//! every message is a [`Notice`] so transports can localize or restyle them.

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Message addressed to the requesting user
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Greeting for `/start` and `/help`
    Welcome {
        /// Free downloads per user
        max_free_downloads: u32,
    },
    /// Upgrade information for `/premium`
    Premium,
    /// Answer to `/usage`
    Usage {
        /// Downloads consumed
        used: u32,
        /// Free download limit
        limit: u32,
    },
    /// The free quota is used up
    QuotaExceeded {
        /// Free download limit
        limit: u32,
    },
    /// The upload was not a usable `.torrent` file
    InvalidDescriptor {
        /// Why it was rejected
        reason: String,
    },
    /// Descriptor accepted, download running
    DownloadStarted {
        /// Torrent name
        name: String,
    },
    /// Periodic progress report
    Progress {
        /// Percentage complete
        percent: f64,
    },
    /// Every piece is on disk
    DownloadComplete,
    /// Caption for a file sent inline
    FileInline {
        /// File name
        name: String,
    },
    /// A file was too large and was uploaded instead
    FileLinked {
        /// File name
        name: String,
        /// Download link
        url: String,
    },
    /// A file could not be delivered
    FileFailed {
        /// File name
        name: String,
        /// Why delivery failed
        reason: String,
    },
    /// The download failed
    DownloadFailed {
        /// Why it failed
        reason: String,
    },
    /// The download did not finish in time
    DownloadTimedOut {
        /// Configured bound in seconds
        after_secs: u64,
    },
    /// Files were delivered but the usage count could not be saved
    PersistenceFailed,
    /// The working directory will be removed
    CleanupScheduled {
        /// Seconds until removal
        after_secs: u64,
    },
}

impl Notice {
    /// Default English rendering
    pub fn text(&self) -> String {
        match self {
            Notice::Welcome { max_free_downloads } => format!(
                "👋 Welcome! Send me a .torrent file to download.\n\
                 🆓 Free users get {} downloads.\n\
                 💎 Use /premium to upgrade for unlimited downloads.",
                max_free_downloads
            ),
            Notice::Premium => "💎 Upgrade to Premium for unlimited downloads.\n\
                 📨 Contact the bot owner to upgrade your account."
                .to_string(),
            Notice::Usage { used, limit } => format!(
                "📊 You have used {} of {} free downloads ({} left).",
                used,
                limit,
                limit.saturating_sub(*used)
            ),
            Notice::QuotaExceeded { limit } => format!(
                "🛑 You've reached your {} free torrent downloads.\n\
                 💎 Use /premium to upgrade and continue using the bot.",
                limit
            ),
            Notice::InvalidDescriptor { reason } => {
                format!("❌ Please send a valid .torrent file. ({})", reason)
            }
            Notice::DownloadStarted { name } => {
                format!("📥 Torrent received. Starting download of {}...", name)
            }
            Notice::Progress { percent } => format!("🔄 Downloading... {:.2}%", percent),
            Notice::DownloadComplete => "✅ Torrent download complete!".to_string(),
            Notice::FileInline { name } => format!("📎 {}", name),
            Notice::FileLinked { name, url } => {
                format!("📤 {} is too large, link:\n{}", name, url)
            }
            Notice::FileFailed { name, reason } => format!("⚠️ Error with {}: {}", name, reason),
            Notice::DownloadFailed { reason } => format!("❌ Download failed: {}", reason),
            Notice::DownloadTimedOut { after_secs } => format!(
                "⏱️ Download did not finish within {} and was cancelled.",
                human_duration(*after_secs)
            ),
            Notice::PersistenceFailed => {
                "⚠️ Your files were delivered but your usage could not be saved. \
                 Please try again later."
                    .to_string()
            }
            Notice::CleanupScheduled { after_secs } => format!(
                "🧹 Files will auto-delete in {}.",
                human_duration(*after_secs)
            ),
        }
    }
}

fn human_duration(secs: u64) -> String {
    match secs {
        s if s >= 3600 && s % 3600 == 0 => plural(s / 3600, "hour"),
        s if s >= 60 && s % 60 == 0 => plural(s / 60, "minute"),
        s => plural(s, "second"),
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// Outbound channel to the requesting user, implemented by the transport
#[async_trait]
pub trait Replier: Send + Sync {
    /// Send a text message
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Send a file as a document with a caption
    async fn send_file(&self, path: &Path, caption: &str) -> Result<()>;

    /// Send a notice; the default renders it with [`Notice::text`]
    async fn send_notice(&self, notice: &Notice) -> Result<()> {
        self.send_text(&notice.text()).await
    }
}
