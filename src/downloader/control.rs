//! Task registry control: start, pause, resume, cancel, status, list and remove.

use crate::error::{Error, Result};
use crate::types::{Status, TaskId, TaskSnapshot};

use super::DownloadManager;

impl DownloadManager {
    /// Start a download
    ///
    /// A `Created` task is handed to the worker pool and starts once a worker is
    /// free. A `Paused` task is resumed in place. Starting a task that is already
    /// running, completed or cancelled is a logged no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown ID
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::InvalidState`] for a task that settled at `Failed`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use chunk_dl::*;
    /// # async fn example(manager: DownloadManager) -> Result<()> {
    /// let request = DownloadRequest::new("iso", "https://example.com/os.iso", "os.iso")?;
    /// let id = manager.add_download(request).await?;
    /// manager.start_download(&id).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_download(&self, id: &TaskId) -> Result<()> {
        let task = self.task(id).await?;
        if !self.pool.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        match task.current_status() {
            Status::Created => {
                self.dispatch(task);
                Ok(())
            }
            Status::Paused => {
                task.resume();
                Ok(())
            }
            Status::InProgress => {
                tracing::debug!(task_id = %id, "Download already running");
                Ok(())
            }
            Status::Completed => {
                tracing::info!(task_id = %id, "Download already completed");
                Ok(())
            }
            Status::Cancelled => {
                tracing::info!(task_id = %id, "Download was cancelled, not starting");
                Ok(())
            }
            Status::Failed => Err(Error::InvalidState {
                id: id.clone(),
                operation: "start",
                current_state: Status::Failed,
            }),
        }
    }

    /// Pause a running download
    ///
    /// Returns whether the task was paused; pausing a task that is not running is
    /// a no-op that returns false.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown ID.
    pub async fn pause_download(&self, id: &TaskId) -> Result<bool> {
        Ok(self.task(id).await?.pause())
    }

    /// Resume a paused download
    ///
    /// Returns whether the task was resumed. Resuming a running or settled task
    /// is a no-op that returns false.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown ID
    /// - [`Error::InvalidState`] for a task that was never started
    pub async fn resume_download(&self, id: &TaskId) -> Result<bool> {
        let task = self.task(id).await?;
        if task.current_status() == Status::Created {
            return Err(Error::InvalidState {
                id: id.clone(),
                operation: "resume",
                current_state: Status::Created,
            });
        }
        Ok(task.resume())
    }

    /// Cancel a download
    ///
    /// Returns whether the task was cancelled; cancelling a settled task is a
    /// no-op that returns false.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown ID.
    pub async fn cancel_download(&self, id: &TaskId) -> Result<bool> {
        Ok(self.task(id).await?.cancel())
    }

    /// Current snapshot of a download
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown ID.
    pub async fn status_of(&self, id: &TaskId) -> Result<TaskSnapshot> {
        Ok(self.task(id).await?.status())
    }

    /// Snapshots of every registered download
    ///
    /// Ordered by priority (highest first), then by creation time (oldest first).
    /// The order is informational; it does not affect which task runs next.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read().await;
        let mut entries: Vec<_> = tasks
            .values()
            .map(|task| (task.priority(), task.created_at(), task.status()))
            .collect();
        drop(tasks);

        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        entries.into_iter().map(|(_, _, snapshot)| snapshot).collect()
    }

    /// Remove a settled (or never started) download from the registry
    ///
    /// Part-files and the destination are left on disk.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown ID
    /// - [`Error::InvalidState`] while the task is running, paused, waiting for a
    ///   worker or waiting out a retry
    pub async fn remove(&self, id: &TaskId) -> Result<TaskSnapshot> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get(id).ok_or_else(|| Error::NotFound(id.clone()))?;
        if task.is_busy() {
            return Err(Error::InvalidState {
                id: id.clone(),
                operation: "remove",
                current_state: task.current_status(),
            });
        }

        let snapshot = task.status();
        tasks.remove(id);
        drop(tasks);

        tracing::info!(task_id = %id, status = %snapshot.status, "Download removed");
        Ok(snapshot)
    }
}
