//! Inbound dispatch and chat commands.

use crate::error::Result;
use crate::quota::QuotaStore;
use crate::reply::{Notice, Replier};
use crate::types::{DownloadSummary, UserId};

use super::TorrentRelay;

/// Something a user sent to the bot
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A slash command such as `/start` or `/usage@my_bot`
    Command(String),
    /// An uploaded document
    Document {
        /// Name the user gave the file
        file_name: String,
        /// File contents
        bytes: Vec<u8>,
    },
}

/// Recognized commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Premium,
    Usage,
    Unknown,
}

impl Command {
    /// Parse `/name@bot args` into a command
    fn parse(raw: &str) -> Self {
        let word = raw.split_whitespace().next().unwrap_or_default();
        let word = word.trim_start_matches('/');
        let name = word.split('@').next().unwrap_or_default().to_ascii_lowercase();

        match name.as_str() {
            "start" | "help" => Command::Start,
            "premium" => Command::Premium,
            "usage" => Command::Usage,
            _ => Command::Unknown,
        }
    }
}

impl TorrentRelay {
    /// Dispatch anything a user sent
    ///
    /// Documents go through [`handle_document`](Self::handle_document) and
    /// yield a summary; commands are answered directly and yield `None`.
    pub async fn handle_inbound(
        &self,
        user: &UserId,
        inbound: Inbound,
        replier: &dyn Replier,
    ) -> Result<Option<DownloadSummary>> {
        match inbound {
            Inbound::Command(command) => {
                self.handle_command(user, &command, replier).await?;
                Ok(None)
            }
            Inbound::Document { file_name, bytes } => self
                .handle_document(user, &file_name, &bytes, replier)
                .await
                .map(Some),
        }
    }

    /// Answer a chat command
    ///
    /// Unknown commands get the welcome text so users always learn what the
    /// bot accepts.
    pub async fn handle_command(
        &self,
        user: &UserId,
        command: &str,
        replier: &dyn Replier,
    ) -> Result<()> {
        let limit = self.config.bot.max_free_downloads;
        let parsed = Command::parse(command);
        tracing::debug!(user_id = %user, command, parsed = ?parsed, "Handling command");

        let notice = match parsed {
            Command::Start | Command::Unknown => Notice::Welcome {
                max_free_downloads: limit,
            },
            Command::Premium => Notice::Premium,
            Command::Usage => Notice::Usage {
                used: self.quota.get_usage(user).await?,
                limit,
            },
        };

        replier.send_notice(&notice).await
    }

    /// Downloads charged to `user` so far
    pub async fn usage(&self, user: &UserId) -> Result<u32> {
        QuotaStore::get_usage(self.quota.as_ref(), user).await
    }
}
