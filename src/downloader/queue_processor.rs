//! Queue processor: hands tasks to the bounded worker pool.

use std::sync::Arc;

use super::{DownloadManager, DownloadTask};

impl DownloadManager {
    /// Spawn a worker that runs `task` once a concurrency permit is free
    ///
    /// Each task is dispatched at most once. The worker holds its permit for the
    /// whole run, including pauses and retry backoff, so at most
    /// `max_concurrent_downloads` tasks are in flight. Chunk fetchers run on their
    /// own tokio tasks and do not take permits.
    pub(crate) fn dispatch(&self, task: Arc<DownloadTask>) {
        if !task.claim_dispatch() {
            tracing::debug!(task_id = %task.id(), "Download already dispatched");
            return;
        }

        let concurrent_limit = Arc::clone(&self.pool.concurrent_limit);
        tracing::debug!(
            task_id = %task.id(),
            available_permits = concurrent_limit.available_permits(),
            "Dispatching download to worker pool"
        );

        self.pool.workers.spawn(async move {
            // Blocks while max_concurrent_downloads tasks are running
            let _permit = match concurrent_limit.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(task_id = %task.id(), "Worker pool closed, download not started");
                    return;
                }
            };

            if let Err(e) = task.start().await {
                tracing::debug!(task_id = %task.id(), error = %e, "Download worker finished with error");
            }
        });
    }
}
