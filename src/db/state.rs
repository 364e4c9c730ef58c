//! Runtime state tracking: clean-shutdown detection.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session never reached `set_clean_shutdown()`,
    /// including a brand-new database. The relay uses this on startup to log
    /// that leftover working directories are about to be swept.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(CLEAN_SHUTDOWN_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check shutdown state: {}",
                        e
                    )))
                })?;

        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that the relay is running
    ///
    /// Called from `TorrentRelay::new()`. If `shutdown()` does not run before
    /// the next startup, `was_unclean_shutdown()` reports true.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_shutdown_flag(false).await
    }

    /// Mark that the relay is shutting down cleanly
    ///
    /// Called from `TorrentRelay::shutdown()` after pending cleanups ran.
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_shutdown_flag(true).await
    }

    async fn set_shutdown_flag(&self, clean: bool) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let value = if clean { "true" } else { "false" };

        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(CLEAN_SHUTDOWN_KEY)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record shutdown state ({}): {}",
                value, e
            )))
        })?;

        tracing::debug!(clean, "Recorded runtime shutdown state");
        Ok(())
    }
}
