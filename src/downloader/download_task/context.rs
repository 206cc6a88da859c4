//! Download task context: collaborators a task borrows from its manager.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::{Config, RetryConfig};
use crate::source::RangeSource;
use crate::types::Event;

/// Shared collaborators and settings for one download task
#[derive(Clone)]
pub(crate) struct TaskContext {
    /// Where chunk bytes come from
    pub(crate) source: Arc<dyn RangeSource>,
    /// Event broadcast sender
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Bytes per part-file write and per merge copy
    pub(crate) block_size: usize,
    /// Interval between progress events
    pub(crate) progress_interval: Duration,
    /// Backoff settings between attempts
    pub(crate) retry: RetryConfig,
}

impl TaskContext {
    pub(crate) fn new(
        config: &Config,
        source: Arc<dyn RangeSource>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            source,
            event_tx,
            block_size: config.download.block_size.max(1),
            progress_interval: config
                .download
                .progress_interval()
                .max(Duration::from_millis(1)),
            retry: config.retry.clone(),
        }
    }

    /// Send an event; having no subscribers is fine
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
