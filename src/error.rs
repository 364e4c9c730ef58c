//! Error types for torrent-relay
//!
//! This module provides the error handling for the library, including:
//! - Domain-specific error types (Download, Database, quota, descriptor)
//! - Machine-readable error codes for transports and logs
//! - Context information (user, request, path, limits)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for torrent-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for torrent-relay
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "work_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// The submitted file is not a usable torrent descriptor
    #[error("invalid torrent descriptor: {0}")]
    InvalidDescriptor(String),

    /// The user has used up their free downloads
    #[error("user {user_id} has used {used} of {limit} free downloads")]
    QuotaExceeded {
        /// The user that was rejected
        user_id: String,
        /// Downloads already consumed (including in-flight ones)
        used: u32,
        /// Configured free download limit
        limit: u32,
    },

    /// The download engine reported a failure
    #[error("download engine error: {0}")]
    Engine(String),

    /// Uploading an oversized file failed
    #[error("upload failed for {file}: {reason}")]
    UploadFailed {
        /// The file that could not be uploaded
        file: PathBuf,
        /// Why the upload failed
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The download did not complete within the configured bound
    #[error("request {request_id} timed out after {elapsed:?}")]
    TimedOut {
        /// The request whose download stalled
        request_id: String,
        /// How long the request waited before giving up
        elapsed: Duration,
    },

    /// The download was cancelled (shutdown)
    #[error("request {request_id} was cancelled")]
    Cancelled {
        /// The request that was cancelled
        request_id: String,
    },

    /// The working directory could not be prepared
    #[error("failed to prepare working directory {path}: {reason}")]
    WorkDirFailed {
        /// The directory that could not be created or written
        path: PathBuf,
        /// The underlying reason
        reason: String,
    },
}

impl Error {
    /// Machine-readable error code, stable across releases
    ///
    /// Transports can use this to pick localized messages; logs use it as a
    /// low-cardinality field.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "persistence_failed",
            Error::Download(e) => match e {
                DownloadError::TimedOut { .. } => "download_timed_out",
                DownloadError::Cancelled { .. } => "download_cancelled",
                DownloadError::WorkDirFailed { .. } => "work_dir_failed",
            },
            Error::InvalidDescriptor(_) => "invalid_descriptor",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::Engine(_) => "engine_error",
            Error::UploadFailed { .. } => "upload_failed",
            Error::Io(_) => "io_error",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this error is a persistence failure of the usage ledger
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Sqlx(_))
    }
}
