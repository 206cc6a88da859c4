//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::types::Event;

use super::DownloadManager;

/// Interval between checks for remaining active downloads
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polls between info-level progress logs while waiting
const SHUTDOWN_LOG_EVERY: u64 = 50;

impl DownloadManager {
    /// Gracefully shut down the manager
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Waits until no task is running, paused, waiting for a worker or
    ///    waiting out a retry
    /// 2. Stops accepting new downloads
    /// 3. Waits for the worker pool to drain
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// There is no timeout: a paused download keeps shutdown waiting until it is
    /// resumed or cancelled.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.wait_for_active_downloads().await;
        tracing::info!("No active downloads remaining");

        self.pool.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new downloads");

        self.pool.workers.close();
        self.pool.workers.wait().await;

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until every registered task is idle and no worker is alive
    async fn wait_for_active_downloads(&self) {
        let mut polls: u64 = 0;
        loop {
            let active_count = {
                let tasks = self.tasks.read().await;
                tasks.values().filter(|task| task.is_busy()).count()
            };
            let workers = self.pool.workers.len();

            if active_count == 0 && workers == 0 {
                return;
            }

            if polls % SHUTDOWN_LOG_EVERY == 0 {
                tracing::info!(active_count, workers, "Waiting for active downloads to finish");
            } else {
                tracing::debug!(active_count, workers, "Waiting for active downloads to finish");
            }
            polls += 1;
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
