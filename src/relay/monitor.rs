//! Bounded, cancellable progress polling.

use crate::engine::{DownloadSession, SessionProgress};
use crate::error::{DownloadError, Result};
use crate::reply::{Notice, Replier};
use crate::types::{Event, RequestId};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::TorrentRelay;

impl TorrentRelay {
    /// Poll `session` until the engine reports completion
    ///
    /// Polls immediately, then every `poll_interval`, reporting each snapshot
    /// to the user and to subscribers. Gives up with
    /// [`DownloadError::TimedOut`] once `download_timeout` has elapsed and
    /// with [`DownloadError::Cancelled`] when `token` is cancelled. Engine
    /// errors end the watch immediately. Stopping the session is left to the
    /// caller.
    pub(crate) async fn watch_session(
        &self,
        request_id: &RequestId,
        session: &DownloadSession,
        token: &CancellationToken,
        replier: &dyn Replier,
    ) -> Result<SessionProgress> {
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.download.download_timeout);
        tokio::pin!(deadline);

        let mut interval = tokio::time::interval(self.config.download.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::info!(request_id = %request_id, "Download cancelled");
                    return Err(DownloadError::Cancelled {
                        request_id: request_id.to_string(),
                    }
                    .into());
                }
                _ = &mut deadline => {
                    return Err(DownloadError::TimedOut {
                        request_id: request_id.to_string(),
                        elapsed: started.elapsed(),
                    }
                    .into());
                }
                _ = interval.tick() => {
                    let progress = self.engine.poll_progress(session).await?;

                    tracing::debug!(
                        request_id = %request_id,
                        percent = progress.percent(),
                        completed_bytes = progress.completed_bytes,
                        total_bytes = progress.total_bytes,
                        "Download progress"
                    );
                    self.emit_event(Event::Progress {
                        request_id: request_id.clone(),
                        percent: progress.percent(),
                    });

                    if progress.complete {
                        return Ok(progress);
                    }
                    self.notify(replier, Notice::Progress { percent: progress.percent() }).await;
                }
            }
        }
    }
}
