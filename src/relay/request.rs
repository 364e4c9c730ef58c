//! The per-request pipeline.
//!
//! `Received → QuotaChecked → DescriptorValidated → Downloading → Completed →
//! Delivered → Accounted → CleanupScheduled`, leaving early through
//! `Rejected` (quota) or `Failed` (descriptor, download, delivery setup or
//! persistence). Validation and quota failures return before any directory,
//! engine session or network call exists.

use crate::delivery::{DeliveryResult, DeliveryRouter, OutputFile};
use crate::engine::DownloadSession;
use crate::error::{DownloadError, Error, Result};
use crate::quota::has_remaining;
use crate::reply::{Notice, Replier};
use crate::torrent::{TorrentMetadata, parse_descriptor};
use crate::types::{DownloadSummary, Event, RequestId, Stage, UserId};
use crate::utils::{get_available_space, has_torrent_extension, safe_file_name};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::TorrentRelay;

/// Name used for the persisted descriptor when the upload name is unusable
const FALLBACK_DESCRIPTOR_NAME: &str = "request.torrent";

/// Holds one unit of a user's quota while their request is running
///
/// Dropping the reservation releases it, whatever path the request took.
pub(crate) struct Reservation {
    in_flight: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<UserId, u32>>>,
    user: UserId,
    /// Requests from the same user that were already in flight
    pub(crate) prior: u32,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(count) = in_flight.get_mut(&self.user) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(&self.user);
            }
        }
    }
}

impl TorrentRelay {
    /// Run one download request from a descriptor upload to cleanup
    ///
    /// Every outcome is reported to the user through `replier`. On success
    /// the returned summary lists the delivery result of each file; the
    /// working directory is removed after the configured grace period.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDescriptor`] for a wrong extension or malformed descriptor
    /// - [`Error::QuotaExceeded`] when the free quota is used up
    /// - [`DownloadError::TimedOut`] / [`DownloadError::Cancelled`] and
    ///   [`Error::Engine`] when the download does not complete
    /// - [`Error::Database`] when the usage increment cannot be persisted
    ///   (files were already delivered and cleanup is still scheduled)
    pub async fn handle_document(
        &self,
        user: &UserId,
        file_name: &str,
        bytes: &[u8],
        replier: &dyn Replier,
    ) -> Result<DownloadSummary> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            self.notify(
                replier,
                Notice::DownloadFailed {
                    reason: "the bot is restarting, please try again shortly".into(),
                },
            )
            .await;
            return Err(Error::ShuttingDown);
        }

        tracing::info!(user_id = %user, file_name, stage = ?Stage::Received, "Request received");

        if !has_torrent_extension(file_name) {
            let err = Error::InvalidDescriptor(format!("{} is not a .torrent file", file_name));
            return Err(self
                .reject(user, replier, err, Notice::InvalidDescriptor {
                    reason: "expected a .torrent file".into(),
                })
                .await);
        }

        let reservation = self.reserve(user);
        let used = match self.quota.get_usage(user).await {
            Ok(used) => used,
            Err(e) => {
                tracing::error!(user_id = %user, error = %e, "Failed to read usage");
                self.notify(
                    replier,
                    Notice::DownloadFailed {
                        reason: "your usage could not be checked, please try again later".into(),
                    },
                )
                .await;
                return Err(e);
            }
        };
        let limit = self.config.bot.max_free_downloads;
        if !has_remaining(used, reservation.prior, limit) {
            let err = Error::QuotaExceeded {
                user_id: user.to_string(),
                used: used.saturating_add(reservation.prior),
                limit,
            };
            tracing::info!(user_id = %user, used, limit, stage = ?Stage::Rejected, "Quota exhausted");
            return Err(self
                .reject(user, replier, err, Notice::QuotaExceeded { limit })
                .await);
        }
        tracing::debug!(user_id = %user, used, limit, stage = ?Stage::QuotaChecked, "Quota checked");

        let metadata = match parse_descriptor(bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                let reason = match &e {
                    Error::InvalidDescriptor(reason) => reason.clone(),
                    other => other.to_string(),
                };
                tracing::info!(user_id = %user, error = %e, stage = ?Stage::Failed, "Descriptor rejected");
                return Err(self
                    .reject(user, replier, e, Notice::InvalidDescriptor { reason })
                    .await);
            }
        };
        tracing::debug!(
            user_id = %user,
            name = %metadata.name,
            info_hash = %metadata.info_hash,
            total_bytes = metadata.total_size(),
            stage = ?Stage::DescriptorValidated,
            "Descriptor validated"
        );

        if let Err(e) = self.check_disk_space(metadata.total_size()) {
            let reason = e.to_string();
            return Err(self
                .reject(user, replier, e, Notice::DownloadFailed { reason })
                .await);
        }

        let _permit = self
            .state
            .concurrent_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let request_id = RequestId::generate(user);
        let work_dir = self.config.download.work_dir.join(request_id.as_str());

        let result = self
            .run_download(user, &request_id, &work_dir, file_name, &metadata, replier)
            .await;

        self.state.active_downloads.lock().await.remove(&request_id);
        drop(reservation);
        result
    }

    /// Everything after admission: download, deliver, account, schedule cleanup
    async fn run_download(
        &self,
        user: &UserId,
        request_id: &RequestId,
        work_dir: &Path,
        file_name: &str,
        metadata: &TorrentMetadata,
        replier: &dyn Replier,
    ) -> Result<DownloadSummary> {
        let session = match self.start(work_dir, file_name, metadata).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, stage = ?Stage::Failed, "Failed to start download");
                self.fail(request_id, work_dir, replier, &e).await;
                return Err(e);
            }
        };

        self.emit_event(Event::RequestAccepted {
            request_id: request_id.clone(),
            user_id: user.clone(),
            name: metadata.name.clone(),
            total_bytes: metadata.total_size(),
        });
        self.notify(
            replier,
            Notice::DownloadStarted {
                name: metadata.name.clone(),
            },
        )
        .await;
        tracing::info!(
            request_id = %request_id,
            engine = self.engine.name(),
            handle = %session.handle,
            stage = ?Stage::Downloading,
            "Download started"
        );

        let token = CancellationToken::new();
        self.state
            .active_downloads
            .lock()
            .await
            .insert(request_id.clone(), token.clone());
        // Shutdown may have swept the token map before this insert
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            token.cancel();
        }

        let watched = self
            .watch_session(request_id, &session, &token, replier)
            .await;
        self.stop_session(&session).await;

        if let Err(e) = watched {
            tracing::warn!(request_id = %request_id, error = %e, stage = ?Stage::Failed, "Download did not complete");
            self.fail(request_id, work_dir, replier, &e).await;
            return Err(e);
        }

        tracing::info!(request_id = %request_id, stage = ?Stage::Completed, "Download complete");
        self.emit_event(Event::DownloadComplete {
            request_id: request_id.clone(),
        });
        self.notify(replier, Notice::DownloadComplete).await;

        let deliveries = self
            .deliver_all(request_id, work_dir, metadata, replier)
            .await;
        tracing::info!(
            request_id = %request_id,
            files = deliveries.len(),
            stage = ?Stage::Delivered,
            "Delivery finished"
        );

        let accounted = self.quota.record_download(user).await;

        // Scheduled whether or not accounting succeeded so the directory never leaks
        self.schedule_cleanup(request_id, work_dir, replier).await;

        let downloads_used = match accounted {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    user_id = %user,
                    error = %e,
                    stage = ?Stage::Failed,
                    "Failed to persist usage"
                );
                self.notify(replier, Notice::PersistenceFailed).await;
                self.emit_event(Event::DownloadFailed {
                    request_id: request_id.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        tracing::info!(
            request_id = %request_id,
            user_id = %user,
            downloads_used,
            stage = ?Stage::Accounted,
            "Usage recorded"
        );
        self.emit_event(Event::UsageRecorded {
            user_id: user.clone(),
            downloads_used,
        });

        Ok(DownloadSummary {
            request_id: request_id.clone(),
            name: metadata.name.clone(),
            work_dir: work_dir.to_path_buf(),
            deliveries,
            downloads_used,
        })
    }

    /// Create the working directory, persist the descriptor and start the engine session
    async fn start(
        &self,
        work_dir: &Path,
        file_name: &str,
        metadata: &TorrentMetadata,
    ) -> Result<DownloadSession> {
        let work_dir_failed = |e: std::io::Error| {
            Error::Download(DownloadError::WorkDirFailed {
                path: work_dir.to_path_buf(),
                reason: e.to_string(),
            })
        };

        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(work_dir_failed)?;

        let descriptor_name =
            safe_file_name(file_name).unwrap_or_else(|| FALLBACK_DESCRIPTOR_NAME.to_string());
        tokio::fs::write(work_dir.join(descriptor_name), &metadata.raw)
            .await
            .map_err(work_dir_failed)?;

        self.engine.start_session(metadata, work_dir).await
    }

    async fn stop_session(&self, session: &DownloadSession) {
        if let Err(e) = self.engine.stop_session(session).await {
            tracing::warn!(handle = %session.handle, error = %e, "Failed to stop engine session");
        }
    }

    /// Route every manifest file that exists on disk
    async fn deliver_all(
        &self,
        request_id: &RequestId,
        work_dir: &Path,
        metadata: &TorrentMetadata,
        replier: &dyn Replier,
    ) -> Vec<(PathBuf, DeliveryResult)> {
        let threshold = self.config.delivery.inline_threshold_bytes;
        let mut deliveries = Vec::new();

        for relative in metadata.output_files() {
            let Some(file) = DeliveryRouter::output_file(work_dir, &relative).await else {
                tracing::debug!(
                    request_id = %request_id,
                    file = %relative.display(),
                    "Manifest file not on disk, skipping"
                );
                continue;
            };

            let result = self.router.deliver(&file, threshold).await;
            let result = self.send_delivery(&file, result, replier).await;

            self.emit_event(Event::FileDelivered {
                request_id: request_id.clone(),
                path: relative.clone(),
                result: result.clone(),
            });
            deliveries.push((relative, result));
        }

        deliveries
    }

    /// Tell the user about one routed file, sending inline files through the replier
    async fn send_delivery(
        &self,
        file: &OutputFile,
        result: DeliveryResult,
        replier: &dyn Replier,
    ) -> DeliveryResult {
        let name = file.file_name();
        match result {
            DeliveryResult::Inline { path } => {
                let caption = Notice::FileInline { name: name.clone() }.text();
                match replier.send_file(&path, &caption).await {
                    Ok(()) => DeliveryResult::Inline { path },
                    Err(e) => {
                        tracing::warn!(file = %name, error = %e, "Failed to send file inline");
                        let reason = e.to_string();
                        self.notify(
                            replier,
                            Notice::FileFailed {
                                name,
                                reason: reason.clone(),
                            },
                        )
                        .await;
                        DeliveryResult::Failed { reason }
                    }
                }
            }
            DeliveryResult::Linked { url } => {
                self.notify(
                    replier,
                    Notice::FileLinked {
                        name,
                        url: url.clone(),
                    },
                )
                .await;
                DeliveryResult::Linked { url }
            }
            DeliveryResult::Failed { reason } => {
                self.notify(
                    replier,
                    Notice::FileFailed {
                        name,
                        reason: reason.clone(),
                    },
                )
                .await;
                DeliveryResult::Failed { reason }
            }
        }
    }

    async fn schedule_cleanup(&self, request_id: &RequestId, work_dir: &Path, replier: &dyn Replier) {
        let grace = self.config.cleanup.grace_period;
        self.cleanup.schedule(work_dir, grace);

        tracing::info!(
            request_id = %request_id,
            delay_secs = grace.as_secs(),
            stage = ?Stage::CleanupScheduled,
            "Cleanup scheduled"
        );
        self.emit_event(Event::CleanupScheduled {
            request_id: request_id.clone(),
            delay_secs: grace.as_secs(),
        });
        self.notify(
            replier,
            Notice::CleanupScheduled {
                after_secs: grace.as_secs(),
            },
        )
        .await;
    }

    /// Tear down a request that failed after its directory was created
    async fn fail(&self, request_id: &RequestId, work_dir: &Path, replier: &dyn Replier, error: &Error) {
        if let Err(e) = self.cleanup.remove_now(work_dir).await {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to remove working directory");
        }

        self.emit_event(Event::DownloadFailed {
            request_id: request_id.clone(),
            error: error.to_string(),
        });

        let notice = match error {
            Error::Download(DownloadError::TimedOut { .. }) => Notice::DownloadTimedOut {
                after_secs: self.config.download.download_timeout.as_secs(),
            },
            Error::Download(DownloadError::Cancelled { .. }) => Notice::DownloadFailed {
                reason: "the bot is restarting, please send the torrent again later".into(),
            },
            other => Notice::DownloadFailed {
                reason: other.to_string(),
            },
        };
        self.notify(replier, notice).await;
    }

    /// Report a request turned away before any resource was allocated
    async fn reject(&self, user: &UserId, replier: &dyn Replier, error: Error, notice: Notice) -> Error {
        self.emit_event(Event::RequestRejected {
            user_id: user.clone(),
            reason: error.error_code().to_string(),
        });
        self.notify(replier, notice).await;
        error
    }

    /// Take an in-flight slot for `user`
    pub(crate) fn reserve(&self, user: &UserId) -> Reservation {
        let mut in_flight = self
            .state
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = in_flight.entry(user.clone()).or_insert(0);
        let prior = *count;
        *count += 1;

        Reservation {
            in_flight: self.state.in_flight.clone(),
            user: user.clone(),
            prior,
        }
    }

    /// Check that the work root can hold `size_bytes` plus the configured reserve
    pub(crate) fn check_disk_space(&self, size_bytes: u64) -> Result<()> {
        let disk = &self.config.disk_space;
        if !disk.enabled {
            return Ok(());
        }

        let required = size_bytes.saturating_add(disk.min_free_space);
        let work_dir = &self.config.download.work_dir;
        let available = get_available_space(work_dir).map_err(|e| {
            Error::DiskSpaceCheckFailed(format!(
                "Failed to check disk space for '{}': {}",
                work_dir.display(),
                e
            ))
        })?;

        if available < required {
            return Err(Error::InsufficientSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Send a notice, logging (not propagating) transport failures
    pub(crate) async fn notify(&self, replier: &dyn Replier, notice: Notice) {
        if let Err(e) = replier.send_notice(&notice).await {
            tracing::warn!(error = %e, notice = ?notice, "Failed to send notice");
        }
    }
}
