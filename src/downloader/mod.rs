//! Download manager split into focused submodules.
//!
//! The `DownloadManager` struct and its methods are organized by domain:
//! - [`control`] - Task registry operations (start/pause/resume/cancel/status/list/remove)
//! - [`queue_processor`] - Dispatch onto the bounded worker pool
//! - [`lifecycle`] - Shutdown coordination
//! - [`download_task`] - Single-task execution: chunk fetchers, state machine, merge

mod control;
mod download_task;
mod lifecycle;
mod queue_processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use download_task::DownloadTask;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, Semaphore, broadcast};
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::source::{HttpRangeSource, RangeSource};
use crate::types::{DownloadRequest, Event, TaskId};

use download_task::TaskContext;

/// Bounded pool that runs download tasks
#[derive(Clone)]
pub(crate) struct WorkerPool {
    /// Limits how many tasks run at once (max_concurrent_downloads)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Every spawned worker, running or waiting for a permit
    pub(crate) workers: TaskTracker,
    /// Flag to indicate whether new work is accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl WorkerPool {
    fn new(max_concurrent: usize) -> Self {
        Self {
            concurrent_limit: Arc::new(Semaphore::new(max_concurrent)),
            workers: TaskTracker::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}

/// Registry of download tasks and the worker pool that runs them
///
/// Cloneable; all clones share the same registry, pool and event channel.
#[derive(Clone)]
pub struct DownloadManager {
    /// Registered tasks by ID
    pub(crate) tasks: Arc<RwLock<HashMap<TaskId, Arc<DownloadTask>>>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Range source shared by every task
    pub(crate) source: Arc<dyn RangeSource>,
    /// Worker pool
    pub(crate) pool: WorkerPool,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("config", &self.config)
            .field("accepting_new", &self.pool.is_accepting())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Create a manager that downloads over HTTP(S)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration, or a network error
    /// if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let source = HttpRangeSource::new(&config.http)?;
        Self::with_source(config, Arc::new(source))
    }

    /// Create a manager with a custom [`RangeSource`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration.
    pub fn with_source(config: Config, source: Arc<dyn RangeSource>) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.download.event_buffer);
        let pool = WorkerPool::new(config.download.max_concurrent_downloads);

        tracing::info!(
            max_concurrent = config.download.max_concurrent_downloads,
            default_chunks = config.download.default_chunks,
            "Download manager initialized"
        );

        Ok(Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            config: Arc::new(config),
            source,
            pool,
        })
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls more than `event_buffer` events behind receives
    /// `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chunk_dl::{Config, DownloadManager};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let manager = DownloadManager::new(Config::default())?;
    ///
    ///     let mut events = manager.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "download event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Register a new task in the `Created` state
    ///
    /// The request's chunk count and retry budget default to the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::Duplicate`] if the ID is already registered
    /// - [`Error::InvalidArgument`] for a chunk count of zero
    pub async fn add_download(&self, request: DownloadRequest) -> Result<TaskId> {
        if !self.pool.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let chunks = request
            .chunks
            .unwrap_or(self.config.download.default_chunks);
        if chunks == 0 {
            return Err(Error::InvalidArgument(
                "chunk count must be at least 1".to_string(),
            ));
        }
        let max_retries = request
            .max_retries
            .unwrap_or(self.config.retry.max_retries);

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&request.id) {
            return Err(Error::Duplicate(request.id));
        }

        let id = request.id.clone();
        let url = request.url.to_string();
        let ctx = TaskContext::new(&self.config, Arc::clone(&self.source), self.event_tx.clone());
        let task = Arc::new(DownloadTask::new(request, chunks, max_retries, ctx));
        tasks.insert(id.clone(), task);
        drop(tasks);

        tracing::info!(task_id = %id, url = %url, chunks, max_retries, "Download added");
        self.emit_event(Event::Added {
            id: id.clone(),
            url,
        });
        Ok(id)
    }

    /// Look up a registered task
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown ID.
    pub async fn task(&self, id: &TaskId) -> Result<Arc<DownloadTask>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Emit an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
