//! Usage ledger: per-user download counts.

use crate::error::DatabaseError;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

use super::{Database, UsageRow};

impl Database {
    /// Get the number of downloads charged to a user (0 if never seen)
    pub async fn get_usage(&self, user_id: &str) -> Result<u32> {
        let used: Option<i64> =
            sqlx::query_scalar("SELECT downloads_used FROM user_usage WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get usage for {}: {}",
                        user_id, e
                    )))
                })?;

        Ok(used.map(clamp_count).unwrap_or(0))
    }

    /// Charge one download to a user and return the new count
    ///
    /// The increment and the read-back happen in a single statement, so
    /// concurrent callers for the same user each observe a distinct count and
    /// no update is lost. The row is durable once this returns.
    pub async fn record_download(&self, user_id: &str) -> Result<u32> {
        let now = chrono::Utc::now().timestamp();

        let used: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO user_usage (user_id, downloads_used, updated_at)
            VALUES (?, 1, ?)
            ON CONFLICT(user_id) DO UPDATE
                SET downloads_used = downloads_used + 1, updated_at = excluded.updated_at
            RETURNING downloads_used
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record download for {}: {}",
                user_id, e
            )))
        })?;

        Ok(clamp_count(used))
    }

    /// List every ledger row, most recently updated first
    pub async fn usage_snapshot(&self) -> Result<Vec<UsageRow>> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT user_id, downloads_used, updated_at
            FROM user_usage
            ORDER BY updated_at DESC, user_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list usage: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Merge a legacy JSON ledger (`{"<user>": <count>}`) into the database
    ///
    /// Counts are merged with `max(existing, imported)` so importing the same
    /// file twice, or an older file, never lowers anyone's usage. Returns the
    /// number of users in the file.
    pub async fn import_usage_json(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let ledger: HashMap<String, u32> = serde_json::from_str(&content)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin import transaction: {}",
                e
            )))
        })?;

        for (user_id, count) in &ledger {
            sqlx::query(
                r#"
                INSERT INTO user_usage (user_id, downloads_used, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(user_id) DO UPDATE
                    SET downloads_used = MAX(downloads_used, excluded.downloads_used),
                        updated_at = excluded.updated_at
                "#,
            )
            .bind(user_id)
            .bind(i64::from(*count))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to import usage for {}: {}",
                    user_id, e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit usage import: {}",
                e
            )))
        })?;

        tracing::info!(
            path = %path.display(),
            users = ledger.len(),
            "Imported legacy usage ledger"
        );
        Ok(ledger.len())
    }
}

fn clamp_count(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}
