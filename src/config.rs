//! Configuration types for torrent-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Environment variable that overrides [`BotConfig::token`]
pub const TOKEN_ENV_VAR: &str = "BOT_TOKEN";

/// Bot identity and quota settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotConfig {
    /// Credential token for the chat transport (None = supplied by the embedder)
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Free downloads per user before an upgrade is required (default: 5)
    #[serde(default = "default_max_free_downloads")]
    pub max_free_downloads: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            max_free_downloads: default_max_free_downloads(),
        }
    }
}

/// Download behavior configuration (working directories, polling, bounds)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root under which one working directory per request is created (default: "./temp")
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Interval between progress polls (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Maximum time a request may spend downloading before it is abandoned (default: 6 hours)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Maximum concurrent engine sessions (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            poll_interval: default_poll_interval(),
            download_timeout: default_download_timeout(),
            max_concurrent_downloads: default_max_concurrent(),
        }
    }
}

/// Delivery routing configuration (inline threshold and upload endpoint)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Files up to this size are sent inline, larger ones are uploaded (default: 49 MiB)
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: u64,

    /// Base URL of the upload host; files are PUT to `{endpoint}/{file name}`
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,

    /// Timeout for a single upload request (default: 300 seconds)
    #[serde(default = "default_upload_timeout", with = "duration_serde")]
    pub upload_timeout: Duration,

    /// Retry policy for failed uploads (default: no retries)
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: default_inline_threshold(),
            upload_endpoint: default_upload_endpoint(),
            upload_timeout: default_upload_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Deferred cleanup configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Delay between delivery and removal of the working directory (default: 300 seconds)
    #[serde(default = "default_grace_period", with = "duration_serde")]
    pub grace_period: Duration,

    /// Remove leftover request directories under `work_dir` on startup (default: true)
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            sweep_on_start: true,
        }
    }
}

/// aria2 JSON-RPC engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// JSON-RPC endpoint of the aria2 daemon (default: http://127.0.0.1:6800/jsonrpc)
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// RPC secret configured with `--rpc-secret`
    #[serde(default)]
    pub rpc_secret: Option<String>,

    /// Timeout for a single RPC call (default: 10 seconds)
    #[serde(default = "default_rpc_timeout", with = "duration_serde")]
    pub rpc_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            rpc_secret: None,
            rpc_timeout: default_rpc_timeout(),
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Check free space before starting a download (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Space that must remain free after the download (default: 1 GB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding the usage ledger (default: "./torrent-relay.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Legacy JSON ledger (`{"user": count}`) merged into the database on startup
    #[serde(default)]
    pub legacy_usage_file: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            legacy_usage_file: None,
        }
    }
}

/// Main configuration for [`TorrentRelay`](crate::TorrentRelay)
///
/// Fields are organized into logical sub-configs:
/// - [`bot`](BotConfig) - token and free quota
/// - [`download`](DownloadConfig) - working directories, polling cadence, timeout
/// - [`delivery`](DeliveryConfig) - inline threshold and upload host
/// - [`cleanup`](CleanupConfig) - grace period before deletion
/// - [`engine`](EngineConfig) - aria2 RPC connection
/// - [`disk_space`](DiskSpaceConfig) - free space checks
/// - [`persistence`](PersistenceConfig) - usage ledger storage
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bot identity and quota
    #[serde(default)]
    pub bot: BotConfig,

    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Delivery routing
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Deferred cleanup
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Download engine connection
    #[serde(default)]
    pub engine: EngineConfig,

    /// Disk space checks
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Usage ledger storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing fields take their defaults. If the `BOT_TOKEN` environment
    /// variable is set it replaces the token from the file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (currently only the bot token)
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR)
            && !token.trim().is_empty()
        {
            self.bot.token = Some(token.trim().to_string());
        }
    }

    /// Reject settings that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than zero", "poll_interval"));
        }
        if self.download.download_timeout < self.download.poll_interval {
            return Err(invalid(
                "download_timeout must be at least one poll_interval",
                "download_timeout",
            ));
        }
        if self.download.max_concurrent_downloads == 0 {
            return Err(invalid(
                "max_concurrent_downloads must be at least 1",
                "max_concurrent_downloads",
            ));
        }
        if self.delivery.inline_threshold_bytes == 0 {
            return Err(invalid(
                "inline_threshold_bytes must be greater than zero",
                "inline_threshold_bytes",
            ));
        }
        if url::Url::parse(&self.delivery.upload_endpoint).is_err() {
            return Err(invalid(
                format!("upload_endpoint is not a URL: {}", self.delivery.upload_endpoint),
                "upload_endpoint",
            ));
        }
        if url::Url::parse(&self.engine.rpc_url).is_err() {
            return Err(invalid(
                format!("rpc_url is not a URL: {}", self.engine.rpc_url),
                "rpc_url",
            ));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 0, the operation runs once)
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

// Default value functions
fn default_max_free_downloads() -> u32 {
    5
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_max_concurrent() -> usize {
    4
}

fn default_inline_threshold() -> u64 {
    49 * 1024 * 1024 // 49 MiB
}

fn default_upload_endpoint() -> String {
    "https://transfer.sh".to_string()
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:6800/jsonrpc".to_string()
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_min_free_space() -> u64 {
    1024 * 1024 * 1024 // 1 GB
}

fn default_database_path() -> PathBuf {
    PathBuf::from("torrent-relay.db")
}

fn default_true() -> bool {
    true
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
