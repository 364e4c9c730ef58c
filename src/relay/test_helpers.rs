//! Shared test helpers for creating TorrentRelay instances in tests.

use crate::config::Config;
use crate::delivery::{OutputFile, Uploader};
use crate::engine::{DownloadEngine, DownloadSession, SessionProgress};
use crate::error::{DatabaseError, Error, Result};
use crate::quota::{MemoryQuotaStore, QuotaStore};
use crate::relay::TorrentRelay;
use crate::reply::Replier;
use crate::torrent::TorrentMetadata;
use crate::types::UserId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// Engine that "downloads" by writing files into the save path after a
/// fixed number of polls
pub(crate) struct StubEngine {
    polls_to_complete: u32,
    files: Vec<(PathBuf, usize)>,
    fail_with: Option<String>,
    polls: AtomicU32,
    pub(crate) started: Mutex<Vec<DownloadSession>>,
    pub(crate) stopped: Mutex<Vec<String>>,
}

impl StubEngine {
    /// Completes on the given poll, producing `files` (path relative to the save path, size)
    pub(crate) fn completing_after(polls: u32, files: &[(&str, usize)]) -> Self {
        Self {
            polls_to_complete: polls,
            files: files
                .iter()
                .map(|(path, size)| (PathBuf::from(path), *size))
                .collect(),
            fail_with: None,
            polls: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    /// Never completes
    pub(crate) fn stalled() -> Self {
        Self::completing_after(u32::MAX, &[])
    }

    /// Fails on the first poll
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::stalled()
        }
    }

    pub(crate) fn start_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.stopped.lock().unwrap().len()
    }

    pub(crate) fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadEngine for StubEngine {
    async fn start_session(
        &self,
        metadata: &TorrentMetadata,
        save_path: &Path,
    ) -> Result<DownloadSession> {
        let mut started = self.started.lock().unwrap();
        let session = DownloadSession {
            handle: format!("stub-{}", started.len()),
            save_path: save_path.to_path_buf(),
            name: metadata.name.clone(),
        };
        started.push(session.clone());
        Ok(session)
    }

    async fn poll_progress(&self, session: &DownloadSession) -> Result<SessionProgress> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.fail_with {
            return Err(Error::Engine(message.clone()));
        }

        if poll >= self.polls_to_complete {
            for (relative, size) in &self.files {
                let path = session.save_path.join(relative);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&path, vec![b'z'; *size]).unwrap();
            }
            return Ok(SessionProgress::from_bytes(100, 100, true));
        }

        Ok(SessionProgress::from_bytes(u64::from(poll), 100, false))
    }

    async fn stop_session(&self, session: &DownloadSession) -> Result<()> {
        self.stopped.lock().unwrap().push(session.handle.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Uploader that returns a predictable link without network access
pub(crate) struct StubUploader {
    pub(crate) uploads: AtomicU32,
    fail: bool,
}

impl StubUploader {
    pub(crate) fn new() -> Self {
        Self {
            uploads: AtomicU32::new(0),
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            uploads: AtomicU32::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl Uploader for StubUploader {
    async fn upload(&self, file: &OutputFile) -> Result<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::UploadFailed {
                file: file.relative.clone(),
                reason: "upload host returned status 413".into(),
            });
        }
        Ok(format!("https://files.example/{}", file.file_name()))
    }
}

/// Something the relay sent through the replier
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Text(String),
    File { path: PathBuf, caption: String },
}

/// Replier that records everything sent to the user
#[derive(Default)]
pub(crate) struct RecordingReplier {
    sent: Mutex<Vec<Sent>>,
    fail_files: bool,
}

impl RecordingReplier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replier whose file sends fail (e.g. the platform rejected the upload)
    pub(crate) fn rejecting_files() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_files: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text),
                Sent::File { .. } => None,
            })
            .collect()
    }

    pub(crate) fn files(&self) -> Vec<PathBuf> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { path, .. } => Some(path),
                Sent::Text(_) => None,
            })
            .collect()
    }

    pub(crate) fn any_text_contains(&self, needle: &str) -> bool {
        self.texts().iter().any(|t| t.contains(needle))
    }
}

#[async_trait]
impl Replier for RecordingReplier {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_file(&self, path: &Path, caption: &str) -> Result<()> {
        if self.fail_files {
            return Err(Error::Other("file too big for the platform".into()));
        }
        self.sent.lock().unwrap().push(Sent::File {
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}

/// Quota store whose increments always fail
pub(crate) struct BrokenLedger {
    inner: MemoryQuotaStore,
}

impl BrokenLedger {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryQuotaStore::new(),
        }
    }
}

#[async_trait]
impl QuotaStore for BrokenLedger {
    async fn get_usage(&self, user: &UserId) -> Result<u32> {
        self.inner.get_usage(user).await
    }

    async fn record_download(&self, _user: &UserId) -> Result<u32> {
        Err(Error::Database(DatabaseError::QueryFailed(
            "disk I/O error".into(),
        )))
    }
}

/// Config with fast polling, a short timeout and disk checks off
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.work_dir = root.join("work");
    config.download.poll_interval = Duration::from_millis(10);
    config.download.download_timeout = Duration::from_secs(5);
    config.download.max_concurrent_downloads = 3;
    config.delivery.inline_threshold_bytes = 1024;
    config.cleanup.grace_period = Duration::from_secs(60);
    config.disk_space.enabled = false;
    config.persistence.database_path = root.join("relay.db");
    config
}

/// Components of a test relay, kept alive for assertions
pub(crate) struct TestRelay {
    pub(crate) relay: TorrentRelay,
    pub(crate) engine: Arc<StubEngine>,
    pub(crate) uploader: Arc<StubUploader>,
    pub(crate) quota: Arc<dyn QuotaStore>,
    pub(crate) temp_dir: TempDir,
}

/// Create a relay around `engine` with an in-memory ledger
pub(crate) async fn create_test_relay(engine: StubEngine) -> TestRelay {
    create_test_relay_with(engine, Arc::new(MemoryQuotaStore::new()), |_| {}).await
}

/// Create a relay with a custom ledger and config tweaks
pub(crate) async fn create_test_relay_with(
    engine: StubEngine,
    quota: Arc<dyn QuotaStore>,
    tweak: impl FnOnce(&mut Config),
) -> TestRelay {
    create_test_relay_full(engine, quota, StubUploader::new(), tweak).await
}

/// Create a relay with every component supplied
pub(crate) async fn create_test_relay_full(
    engine: StubEngine,
    quota: Arc<dyn QuotaStore>,
    uploader: StubUploader,
    tweak: impl FnOnce(&mut Config),
) -> TestRelay {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    tweak(&mut config);

    let engine = Arc::new(engine);
    let uploader = Arc::new(uploader);
    let relay = TorrentRelay::with_components(
        config,
        quota.clone(),
        engine.clone(),
        uploader.clone(),
    )
    .await
    .unwrap();

    TestRelay {
        relay,
        engine,
        uploader,
        quota,
        temp_dir,
    }
}

/// Number of request directories under the work root
pub(crate) fn work_dir_entries(relay: &TorrentRelay) -> usize {
    std::fs::read_dir(&relay.config.download.work_dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}
