//! Download task execution: lifecycle state machine, chunked fetch and merge.
//!
//! Split into focused submodules:
//! - [`context`] - Collaborators shared with the manager (source, events, settings)
//! - [`state`] - Atomic status cell and the suspension gate
//! - [`chunks`] - Byte-range partitioning and part-file naming
//! - [`fetcher`] - One byte range into one part-file, honouring pause and cancel
//! - [`orchestration`] - Attempt loop: probe, fan out fetchers, retry
//! - [`finalization`] - Ordered merge into the destination
//! - [`progress`] - Periodic progress events

mod chunks;
mod context;
mod fetcher;
mod finalization;
mod orchestration;
mod progress;
mod state;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub(crate) use context::TaskContext;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::types::{DownloadRequest, Event, Priority, Status, TaskId, TaskSnapshot};

use state::{StateCell, SuspendGate};

/// A single chunked download and its lifecycle
///
/// Status moves `Created -> InProgress -> Completed`, with `InProgress <-> Paused`
/// cycling, `Failed -> InProgress` only through the retry loop, and `Cancelled`
/// reachable from any non-terminal status. All methods are safe to call
/// concurrently with a running [`start`](Self::start).
pub struct DownloadTask {
    id: TaskId,
    url: Url,
    destination: PathBuf,
    priority: Priority,
    chunks: usize,
    created_at: DateTime<Utc>,
    state: StateCell,
    gate: SuspendGate,
    cancel_token: CancellationToken,
    /// Serializes pause/resume/cancel so the status and the gate change together
    control: Mutex<()>,
    retry: Mutex<RetryPolicy>,
    /// Set while a failed attempt may still be retried; cancel is allowed then
    retry_pending: AtomicBool,
    /// Set once the task has been handed to a worker
    dispatched: AtomicBool,
    downloaded: Arc<AtomicU64>,
    total: AtomicU64,
    last_error: Mutex<Option<String>>,
    ctx: TaskContext,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("destination", &self.destination)
            .field("status", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl DownloadTask {
    pub(crate) fn new(request: DownloadRequest, chunks: usize, max_retries: u32, ctx: TaskContext) -> Self {
        Self {
            id: request.id,
            url: request.url,
            destination: request.destination,
            priority: request.priority,
            chunks: chunks.max(1),
            created_at: Utc::now(),
            state: StateCell::new(Status::Created),
            gate: SuspendGate::new(),
            cancel_token: CancellationToken::new(),
            control: Mutex::new(()),
            retry: Mutex::new(RetryPolicy::new(max_retries)),
            retry_pending: AtomicBool::new(false),
            dispatched: AtomicBool::new(false),
            downloaded: Arc::new(AtomicU64::new(0)),
            total: AtomicU64::new(0),
            last_error: Mutex::new(None),
            ctx,
        }
    }

    /// Task ID
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Final destination path
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Current status
    pub fn current_status(&self) -> Status {
        self.state.load()
    }

    /// Run the task to completion, or resume it if paused
    ///
    /// From `Created` this probes the source, splits it into chunks, fetches them
    /// concurrently and merges the part-files, retrying failed attempts as the
    /// retry policy allows. It returns once the task settles. From `Paused` it
    /// releases the suspended fetchers and returns immediately. On a task that is
    /// already running, completed or cancelled it does nothing.
    ///
    /// # Errors
    ///
    /// Returns the error that failed the task when it settles at `Failed`
    /// ([`Error::RetriesExhausted`] once retries run out), or
    /// [`Error::InvalidState`] when called on a failed task.
    pub async fn start(&self) -> Result<()> {
        match self.state.load() {
            Status::Created => {}
            Status::Paused => {
                self.resume();
                return Ok(());
            }
            Status::InProgress => {
                tracing::debug!(task_id = %self.id, "Task already running");
                return Ok(());
            }
            status @ (Status::Completed | Status::Cancelled) => {
                tracing::info!(task_id = %self.id, %status, "Task already settled, nothing to start");
                return Ok(());
            }
            Status::Failed => return Err(self.invalid_state("start", Status::Failed)),
        }

        if !self.state.transition(Status::Created, Status::InProgress) {
            // Lost to a concurrent start or cancel
            tracing::debug!(task_id = %self.id, status = %self.state.load(), "Task left Created before start");
            return Ok(());
        }

        self.run().await
    }

    /// Suspend a running task
    ///
    /// Fetchers park before their next block write. Returns false (and does
    /// nothing) unless the task is `InProgress`.
    pub fn pause(&self) -> bool {
        let _guard = self.control();
        let current = self.state.load();
        if current != Status::InProgress {
            tracing::debug!(task_id = %self.id, status = %current, "Pause ignored");
            return false;
        }
        // Raise the gate first: whenever the status reads Paused the gate is closed
        self.gate.suspend();
        if !self.state.transition(Status::InProgress, Status::Paused) {
            // The run loop settled the task in between
            self.gate.release();
            return false;
        }

        tracing::info!(task_id = %self.id, "Task paused");
        self.ctx.emit(Event::Paused { id: self.id.clone() });
        true
    }

    /// Resume a paused task
    ///
    /// Parked fetchers continue where they stopped; nothing is re-fetched.
    /// Returns false (and does nothing) unless the task is `Paused`.
    pub fn resume(&self) -> bool {
        let _guard = self.control();
        if !self.state.transition(Status::Paused, Status::InProgress) {
            tracing::debug!(task_id = %self.id, status = %self.state.load(), "Resume ignored");
            return false;
        }
        self.gate.release();

        tracing::info!(task_id = %self.id, "Task resumed");
        self.ctx.emit(Event::Resumed { id: self.id.clone() });
        true
    }

    /// Cancel the task
    ///
    /// Allowed from any non-terminal status, including a failed attempt waiting
    /// out its retry backoff. Running fetchers abort and leave their part-files.
    /// Returns false when the task had already settled.
    pub fn cancel(&self) -> bool {
        let _guard = self.control();
        loop {
            let current = self.state.load();
            let cancellable = match current {
                Status::Created | Status::InProgress | Status::Paused => true,
                Status::Failed => self.retry_pending.load(Ordering::SeqCst),
                Status::Completed | Status::Cancelled => false,
            };
            if !cancellable {
                tracing::debug!(task_id = %self.id, status = %current, "Cancel ignored on settled task");
                return false;
            }
            if self.state.transition(current, Status::Cancelled) {
                break;
            }
        }

        self.cancel_token.cancel();
        tracing::info!(task_id = %self.id, "Task cancelled");
        self.ctx.emit(Event::Cancelled { id: self.id.clone() });
        true
    }

    /// Point-in-time view of the task
    pub fn status(&self) -> TaskSnapshot {
        let status = self.state.load();
        let downloaded_bytes = self.downloaded.load(Ordering::Relaxed);
        let total_bytes = self.total.load(Ordering::Relaxed);
        let progress = match status {
            Status::Completed => 1.0,
            _ if total_bytes > 0 => (downloaded_bytes as f32 / total_bytes as f32).min(1.0),
            _ => 0.0,
        };
        let retry = *lock(&self.retry);

        TaskSnapshot {
            id: self.id.clone(),
            url: self.url.to_string(),
            destination: self.destination.clone(),
            priority: self.priority,
            status,
            downloaded_bytes,
            total_bytes,
            progress,
            retry_count: retry.retry_count(),
            retry_pending: status == Status::Failed && self.retry_pending.load(Ordering::SeqCst),
            max_retries: retry.max_retries(),
            last_error: lock(&self.last_error).clone(),
            created_at: self.created_at,
        }
    }

    /// Claim the right to hand this task to a worker; true exactly once
    pub(crate) fn claim_dispatch(&self) -> bool {
        !self.dispatched.swap(true, Ordering::SeqCst)
    }

    /// Whether the task still holds (or is about to hold) a worker
    pub(crate) fn is_busy(&self) -> bool {
        match self.state.load() {
            Status::InProgress | Status::Paused => true,
            Status::Created => self.dispatched.load(Ordering::SeqCst),
            Status::Failed => self.retry_pending.load(Ordering::SeqCst),
            Status::Completed | Status::Cancelled => false,
        }
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        lock(&self.control)
    }

    fn invalid_state(&self, operation: &'static str, current_state: Status) -> Error {
        Error::InvalidState {
            id: self.id.clone(),
            operation,
            current_state,
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
