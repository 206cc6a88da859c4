//! Background progress reporter for a running attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::types::{Event, TaskId};

use super::context::TaskContext;

/// Parameters for spawning a progress reporter
pub(super) struct ProgressReporterParams {
    pub(super) id: TaskId,
    pub(super) total_bytes: u64,
    pub(super) interval: Duration,
    pub(super) downloaded: Arc<AtomicU64>,
    pub(super) ctx: TaskContext,
    /// Stops the reporter when cancelled
    pub(super) cancel_token: CancellationToken,
}

/// Spawn a task that periodically emits [`Event::Progress`] until cancelled.
pub(super) fn spawn_progress_reporter(params: ProgressReporterParams) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        id,
        total_bytes,
        interval,
        downloaded,
        ctx,
        cancel_token,
    } = params;
    let started = Instant::now();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately; skip the 0% report
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current = downloaded.load(Ordering::Relaxed);
                    let percent = if total_bytes > 0 {
                        (current as f32 / total_bytes as f32) * 100.0
                    } else {
                        0.0
                    };
                    let elapsed_secs = started.elapsed().as_secs_f64();
                    let speed_bps = if elapsed_secs > 0.0 {
                        (current as f64 / elapsed_secs) as u64
                    } else {
                        0
                    };

                    ctx.emit(Event::Progress {
                        id: id.clone(),
                        percent,
                        downloaded_bytes: current,
                        total_bytes,
                        speed_bps,
                    });
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}
