//! Database layer for torrent-relay
//!
//! Handles SQLite persistence for the per-user usage ledger and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`usage`] - Usage ledger reads, atomic increments, legacy import
//! - [`state`] - Runtime state (shutdown tracking)

use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod state;
mod usage;

/// Usage ledger row
#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    /// Chat user identifier
    pub user_id: String,
    /// Number of completed downloads charged to the user
    pub downloads_used: i64,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

/// Database handle for torrent-relay
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
