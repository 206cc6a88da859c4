//! Download task orchestration: attempt loop, chunk fan-out and settling.

use std::sync::atomic::Ordering;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::retry::{Backoff, IsRetryable};
use crate::types::{Event, Status};

use super::chunks::{ChunkSpec, plan_chunks};
use super::fetcher::{ChunkFetcher, ChunkOutcome};
use super::finalization::{commit_staged, discard_staged, remove_parts, stage_parts};
use super::progress::{ProgressReporterParams, spawn_progress_reporter};
use super::{DownloadTask, lock};

impl DownloadTask {
    /// Attempt loop; the task is `InProgress` on entry
    ///
    /// Each attempt starts from scratch: fresh probe, fresh plan, fresh part-files.
    /// A failed attempt commits `Failed`. When the error is retryable and the retry
    /// policy grants another try, the retry is recorded and the task backs off and
    /// restarts; otherwise it settles for good.
    pub(super) async fn run(&self) -> Result<()> {
        let mut backoff = Backoff::new(&self.ctx.retry);
        let mut attempt: u32 = 1;

        loop {
            let error = match self.run_attempt(attempt).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            if self.cancel_token.is_cancelled() {
                return Ok(());
            }

            tracing::warn!(
                task_id = %self.id,
                attempt,
                network_failure = error.is_network_failure(),
                error = %error,
                "Download attempt failed"
            );
            *lock(&self.last_error) = Some(error.to_string());

            self.retry_pending.store(true, Ordering::SeqCst);
            if !self.settle(Status::Failed).await {
                self.retry_pending.store(false, Ordering::SeqCst);
                return Ok(());
            }

            let retry = {
                let mut policy = lock(&self.retry);
                let granted = error.is_retryable() && policy.should_retry();
                if granted {
                    policy.record_attempt();
                }
                granted
            };

            if !retry {
                let still_failed = {
                    let _guard = self.control();
                    self.retry_pending.store(false, Ordering::SeqCst);
                    self.state.load() == Status::Failed
                };
                if !still_failed {
                    // Cancelled while the decision was being made
                    return Ok(());
                }

                let error = if error.is_retryable() {
                    Error::RetriesExhausted {
                        id: self.id.clone(),
                        attempts: attempt,
                        last_error: error.to_string(),
                    }
                } else {
                    error
                };
                tracing::error!(task_id = %self.id, attempts = attempt, error = %error, "Download failed");
                self.ctx.emit(Event::Failed {
                    id: self.id.clone(),
                    error: error.to_string(),
                });
                return Err(error);
            }

            let delay = backoff.next_delay();
            attempt += 1;
            tracing::info!(
                task_id = %self.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying download after backoff"
            );
            self.ctx.emit(Event::Retrying {
                id: self.id.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: error.to_string(),
            });

            tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }

            let restarted = {
                let _guard = self.control();
                let restarted = self.state.transition(Status::Failed, Status::InProgress);
                self.retry_pending.store(false, Ordering::SeqCst);
                restarted
            };
            if !restarted {
                return Ok(());
            }
        }
    }

    /// One probe, fetch and merge pass
    ///
    /// Ok means the task settled (completed, or cancelled along the way); Err is a
    /// failed attempt.
    async fn run_attempt(&self, attempt: u32) -> Result<()> {
        self.downloaded.store(0, Ordering::Relaxed);

        let info = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Ok(()),
            info = self.ctx.source.probe(&self.url) => info?,
        };
        self.total.store(info.content_length, Ordering::Relaxed);

        let chunks = if info.accepts_ranges || info.content_length == 0 {
            self.chunks
        } else {
            tracing::warn!(
                task_id = %self.id,
                url = %self.url,
                "Server does not support range requests, downloading as a single chunk"
            );
            1
        };
        let plan = plan_chunks(info.content_length, chunks, &self.destination);

        tracing::info!(
            task_id = %self.id,
            attempt,
            total_bytes = info.content_length,
            chunks = plan.len(),
            "Starting download attempt"
        );
        self.ctx.emit(Event::Started {
            id: self.id.clone(),
            attempt,
            total_bytes: info.content_length,
            chunks: plan.len(),
        });

        if let Some(parent) = self
            .destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        if !self.fetch_chunks(&plan, info.accepts_ranges, info.content_length).await? {
            return Ok(());
        }

        // Merge only from InProgress; a pause here holds the merge
        if !self.wait_until_running().await {
            return Ok(());
        }

        let written = stage_parts(&plan, &self.destination, self.ctx.block_size).await?;
        tracing::debug!(task_id = %self.id, bytes = written, "Merged part-files into staging file");

        if !self.commit_merge(&plan).await? {
            tracing::info!(task_id = %self.id, "Task cancelled before the merged file was committed");
            return Ok(());
        }

        self.downloaded.store(written, Ordering::Relaxed);
        tracing::info!(
            task_id = %self.id,
            path = %self.destination.display(),
            bytes = written,
            "Download complete"
        );
        self.ctx.emit(Event::Completed {
            id: self.id.clone(),
            path: self.destination.clone(),
        });
        Ok(())
    }

    /// Move the staged file onto the destination and settle `Completed`
    ///
    /// The rename and the status change happen together under the control lock:
    /// a concurrent cancel either lands first and the staged file is discarded,
    /// or finds the task already completed. A pause holds the commit until resume.
    /// Returns false if the task was cancelled.
    pub(super) async fn commit_merge(&self, plan: &[ChunkSpec]) -> Result<bool> {
        let mut gate = self.gate.token();
        loop {
            let committed = {
                let _guard = self.control();
                match self.state.load() {
                    Status::InProgress => {
                        commit_staged(&self.destination)?;
                        Some(self.state.transition(Status::InProgress, Status::Completed))
                    }
                    Status::Paused => None,
                    _ => Some(false),
                }
            };

            match committed {
                Some(true) => {
                    remove_parts(plan).await;
                    return Ok(true);
                }
                Some(false) => {
                    discard_staged(&self.destination).await;
                    return Ok(false);
                }
                None => {
                    if !gate.wait_released(&self.cancel_token).await {
                        discard_staged(&self.destination).await;
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Run one fetcher per chunk concurrently and wait for all of them
    ///
    /// The first failure cancels the remaining fetchers of this attempt. Returns
    /// Ok(false) when the task was cancelled.
    async fn fetch_chunks(&self, plan: &[ChunkSpec], ranged: bool, total_bytes: u64) -> Result<bool> {
        let attempt_token = self.cancel_token.child_token();
        let reporter_token = attempt_token.child_token();
        let _stop_reporter = reporter_token.clone().drop_guard();
        let _reporter = spawn_progress_reporter(ProgressReporterParams {
            id: self.id.clone(),
            total_bytes,
            interval: self.ctx.progress_interval,
            downloaded: self.downloaded.clone(),
            ctx: self.ctx.clone(),
            cancel_token: reporter_token,
        });

        let mut fetchers = JoinSet::new();
        for spec in plan {
            let fetcher = ChunkFetcher {
                task_id: self.id.clone(),
                url: self.url.clone(),
                spec: spec.clone(),
                ranged,
                source: self.ctx.source.clone(),
                block_size: self.ctx.block_size,
                suspend: self.gate.token(),
                cancel: attempt_token.clone(),
                downloaded: self.downloaded.clone(),
            };
            fetchers.spawn(fetcher.run());
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = fetchers.join_next().await {
            match joined {
                Ok(ChunkOutcome::Completed { index, bytes }) => {
                    tracing::debug!(task_id = %self.id, chunk = index, bytes, "Chunk complete");
                    self.ctx.emit(Event::ChunkComplete {
                        id: self.id.clone(),
                        index,
                        bytes,
                    });
                }
                Ok(ChunkOutcome::Aborted { index }) => {
                    tracing::trace!(task_id = %self.id, chunk = index, "Chunk stopped early");
                }
                Ok(ChunkOutcome::Failed { index, error }) => {
                    tracing::warn!(task_id = %self.id, chunk = index, error = %error, "Chunk fetch failed");
                    record_first_failure(&mut first_error, &attempt_token, error);
                }
                Err(join_error) => {
                    tracing::error!(task_id = %self.id, error = %join_error, "Chunk fetcher panicked");
                    let error = Error::Io(std::io::Error::other(format!(
                        "chunk fetcher panicked: {join_error}"
                    )));
                    record_first_failure(&mut first_error, &attempt_token, error);
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        Ok(!self.cancel_token.is_cancelled())
    }

    /// Commit `InProgress -> target`, waiting out a pause first
    ///
    /// Returns false if the task was cancelled instead.
    async fn settle(&self, target: Status) -> bool {
        let mut gate = self.gate.token();
        loop {
            if self.state.transition(Status::InProgress, target) {
                return true;
            }
            match self.state.load() {
                Status::Paused => {
                    if !gate.wait_released(&self.cancel_token).await {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }

    /// Wait until the task is `InProgress`; false if it was cancelled
    async fn wait_until_running(&self) -> bool {
        let mut gate = self.gate.token();
        loop {
            match self.state.load() {
                Status::InProgress => return true,
                Status::Paused => {
                    tracing::debug!(
                        task_id = %self.id,
                        suspended = self.gate.is_suspended(),
                        "Chunks finished while paused, holding merge"
                    );
                    if !gate.wait_released(&self.cancel_token).await {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

fn record_first_failure(first: &mut Option<Error>, attempt_token: &CancellationToken, error: Error) {
    if first.is_none() {
        attempt_token.cancel();
        *first = Some(error);
    }
}
