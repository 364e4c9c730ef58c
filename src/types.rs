//! Core types for torrent-relay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::delivery::DeliveryResult;

/// Identity of a chat user
///
/// Transports with numeric ids render them to strings; the relay never
/// interprets the value.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new UserId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide sequence that disambiguates requests created in the same microsecond
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identifier of a single download request
///
/// Rendered as `{user}_{unix_micros}_{seq}` and used verbatim as the name of
/// the request's working directory, so two concurrent requests never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a fresh id for `user`
    pub fn generate(user: &UserId) -> Self {
        let micros = chrono::Utc::now().timestamp_micros();
        let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}_{}_{}",
            crate::utils::sanitize_component(user.as_str()),
            micros,
            seq
        ))
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `name` has the shape of a generated id (`{user}_{micros}_{seq}`)
    ///
    /// Used to tell the relay's own working directories apart from anything
    /// else living under the work root.
    pub fn is_request_dir_name(name: &str) -> bool {
        let mut parts = name.rsplitn(3, '_');
        let (Some(seq), Some(micros), Some(user)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        is_number(seq)
            && is_number(micros)
            && !user.is_empty()
            && user
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle stage of a request
///
/// Stages advance strictly in declaration order; `Rejected` and `Failed` are
/// terminal exits reachable from any earlier stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request arrived
    Received,
    /// Quota lookup passed
    QuotaChecked,
    /// Descriptor parsed
    DescriptorValidated,
    /// Engine session running
    Downloading,
    /// Engine reported completion
    Completed,
    /// Every manifest file was routed
    Delivered,
    /// Usage ledger incremented
    Accounted,
    /// Working directory removal armed
    CleanupScheduled,
    /// Rejected by quota
    Rejected,
    /// Failed (descriptor, download, delivery or persistence)
    Failed,
}

/// Outcome of a request that reached the end of the pipeline
#[derive(Clone, Debug)]
pub struct DownloadSummary {
    /// Request identifier
    pub request_id: RequestId,
    /// Torrent name from the descriptor
    pub name: String,
    /// Working directory (removed after the grace period)
    pub work_dir: PathBuf,
    /// Per-file delivery results, in manifest order
    pub deliveries: Vec<(PathBuf, DeliveryResult)>,
    /// The user's consumed download count after accounting
    pub downloads_used: u32,
}

impl DownloadSummary {
    /// Number of files that could not be delivered
    pub fn failed_deliveries(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|(_, result)| matches!(result, DeliveryResult::Failed { .. }))
            .count()
    }
}

/// Event emitted by the relay for observers (metrics, admin dashboards)
///
/// Unlike [`Notice`](crate::reply::Notice), events are not addressed to the
/// requesting user.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request passed validation and quota and is starting
    RequestAccepted {
        /// Request identifier
        request_id: RequestId,
        /// Requesting user
        user_id: UserId,
        /// Torrent name
        name: String,
        /// Total declared size in bytes
        total_bytes: u64,
    },

    /// A request was turned away before any resource was allocated
    RequestRejected {
        /// Requesting user
        user_id: UserId,
        /// Machine-readable reason (see [`Error::error_code`](crate::Error::error_code))
        reason: String,
    },

    /// Progress snapshot from one poll
    Progress {
        /// Request identifier
        request_id: RequestId,
        /// Progress percentage (0.0 to 100.0)
        percent: f64,
    },

    /// Engine reported completion
    DownloadComplete {
        /// Request identifier
        request_id: RequestId,
    },

    /// Download failed, timed out or was cancelled
    DownloadFailed {
        /// Request identifier
        request_id: RequestId,
        /// Error message
        error: String,
    },

    /// One manifest file was routed
    FileDelivered {
        /// Request identifier
        request_id: RequestId,
        /// Path relative to the working directory
        path: PathBuf,
        /// Routing outcome
        result: DeliveryResult,
    },

    /// Usage ledger incremented
    UsageRecorded {
        /// User whose count changed
        user_id: UserId,
        /// New count
        downloads_used: u32,
    },

    /// Working directory removal armed
    CleanupScheduled {
        /// Request identifier
        request_id: RequestId,
        /// Seconds until removal
        delay_secs: u64,
    },

    /// Relay is shutting down
    Shutdown,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_recognized_as_request_dirs() {
        for user in ["alice", "a_b", "weird name/..", "42"] {
            let id = RequestId::generate(&UserId::from(user));
            assert!(RequestId::is_request_dir_name(id.as_str()), "{id}");
        }
    }

    #[test]
    fn foreign_names_are_not_request_dirs() {
        for name in ["src", "target", "alice_1", "alice__1", "_1_0", "alice_x_0", "a b_1_0", ".git"] {
            assert!(!RequestId::is_request_dir_name(name), "{name}");
        }
        assert!(RequestId::is_request_dir_name("old_1_0"));
    }

    #[test]
    fn request_ids_are_unique_for_the_same_user() {
        let user = UserId::from("alice");
        let ids: std::collections::HashSet<_> =
            (0..100).map(|_| RequestId::generate(&user)).collect();

        assert_eq!(ids.len(), 100, "request ids collided");
    }

    #[test]
    fn request_id_starts_with_sanitized_user() {
        let id = RequestId::generate(&UserId::from("../evil"));

        assert!(!id.as_str().contains('/'), "path separator leaked: {id}");
        assert!(id.as_str().starts_with("___evil_"), "unexpected id {id}");
    }

    #[test]
    fn numeric_user_ids_render_as_strings() {
        assert_eq!(UserId::from(123456789_i64).as_str(), "123456789");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::UsageRecorded {
            user_id: UserId::from("alice"),
            downloads_used: 5,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "usage_recorded");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["downloads_used"], 5);
    }
}
