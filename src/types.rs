//! Core types for chunk-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::error::{Error, Result};

/// Unique, caller-assigned identifier for a download task
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Download task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Registered but never started
    Created,
    /// Chunks are being fetched or merged
    InProgress,
    /// Suspended by the caller; fetchers are parked before their next write
    Paused,
    /// Destination file fully written
    Completed,
    /// Failed; terminal unless a retry is pending (see [`TaskSnapshot::retry_pending`])
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl Status {
    /// Convert a stored status code to Status
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => Status::Created,
            1 => Status::InProgress,
            2 => Status::Paused,
            3 => Status::Completed,
            4 => Status::Failed,
            5 => Status::Cancelled,
            _ => Status::Failed, // Unknown codes are treated as failures
        }
    }

    /// Convert Status to its stored status code
    pub fn to_u8(self) -> u8 {
        match self {
            Status::Created => 0,
            Status::InProgress => 1,
            Status::Paused => 2,
            Status::Completed => 3,
            Status::Failed => 4,
            Status::Cancelled => 5,
        }
    }

    /// True while chunk fetchers may still be holding resources (running or suspended)
    pub fn is_active(self) -> bool {
        matches!(self, Status::InProgress | Status::Paused)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Created => "created",
            Status::InProgress => "in_progress",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Download priority (higher = more urgent)
///
/// Informational only: it orders [`DownloadManager::list`](crate::DownloadManager::list)
/// but never gates admission to the worker pool.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl From<i32> for Priority {
    fn from(priority: i32) -> Self {
        Self(priority)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to register a download task
///
/// `chunks` and `max_retries` fall back to the manager's configuration when unset.
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// Caller-assigned task ID
    pub id: TaskId,
    /// Source URL (http or https)
    pub url: Url,
    /// Final destination path
    pub destination: PathBuf,
    /// Informational priority
    pub priority: Priority,
    /// Number of parallel byte-range chunks (None = config default)
    pub chunks: Option<usize>,
    /// Retry budget for failed attempts (None = config default)
    pub max_retries: Option<u32>,
}

impl DownloadRequest {
    /// Build a request, validating the URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the URL does not parse or is not http(s).
    pub fn new(
        id: impl Into<TaskId>,
        url: &str,
        destination: impl Into<PathBuf>,
    ) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidArgument(format!("malformed URL '{}': {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidArgument(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        Ok(Self {
            id: id.into(),
            url,
            destination: destination.into(),
            priority: Priority::default(),
            chunks: None,
            max_retries: None,
        })
    }

    /// Set the informational priority
    #[must_use]
    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the number of parallel chunks
    #[must_use]
    pub fn chunks(mut self, chunks: usize) -> Self {
        self.chunks = Some(chunks);
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Point-in-time view of a download task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: TaskId,
    /// Source URL
    pub url: String,
    /// Destination path
    pub destination: PathBuf,
    /// Informational priority
    pub priority: Priority,
    /// Current status
    pub status: Status,
    /// Bytes written to part-files in the current attempt
    pub downloaded_bytes: u64,
    /// Total size reported by the probe (0 until probed)
    pub total_bytes: u64,
    /// Progress fraction (0.0 to 1.0)
    pub progress: f32,
    /// Retries granted by the retry policy so far
    pub retry_count: u32,
    /// A failed attempt is waiting out its backoff before the next one; while set,
    /// a `Failed` status is not final
    pub retry_pending: bool,
    /// Retry budget
    pub max_retries: u32,
    /// Most recent failure, if any
    pub last_error: Option<String>,
    /// When the task was registered
    pub created_at: DateTime<Utc>,
}

impl TaskSnapshot {
    /// Whether the task has reached a final status and will not change on its own
    pub fn is_settled(&self) -> bool {
        match self.status {
            Status::Completed | Status::Cancelled => true,
            Status::Failed => !self.retry_pending,
            Status::Created | Status::InProgress | Status::Paused => false,
        }
    }

    /// Progress as a percentage (0.0 to 100.0)
    pub fn progress_percent(&self) -> f32 {
        self.progress * 100.0
    }
}

/// Event emitted during a task's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task registered with the manager
    Added {
        /// Task ID
        id: TaskId,
        /// Source URL
        url: String,
    },

    /// An attempt probed the source and launched its chunk fetchers
    Started {
        /// Task ID
        id: TaskId,
        /// Attempt number (1-based)
        attempt: u32,
        /// Total size in bytes
        total_bytes: u64,
        /// Number of chunks in the plan
        chunks: usize,
    },

    /// Periodic progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Bytes written so far in this attempt
        downloaded_bytes: u64,
        /// Total size in bytes
        total_bytes: u64,
        /// Average speed in bytes per second since the attempt started
        speed_bps: u64,
    },

    /// One chunk finished writing its part-file
    ChunkComplete {
        /// Task ID
        id: TaskId,
        /// Chunk index
        index: usize,
        /// Bytes written
        bytes: u64,
    },

    /// Task paused
    Paused {
        /// Task ID
        id: TaskId,
    },

    /// Task resumed
    Resumed {
        /// Task ID
        id: TaskId,
    },

    /// A failed attempt will be retried after a delay
    Retrying {
        /// Task ID
        id: TaskId,
        /// Number of the attempt about to start
        attempt: u32,
        /// Backoff delay in milliseconds
        delay_ms: u64,
        /// Error that failed the previous attempt
        error: String,
    },

    /// Destination file written
    Completed {
        /// Task ID
        id: TaskId,
        /// Final file path
        path: PathBuf,
    },

    /// Task settled in the failed state
    Failed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// Task cancelled
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Manager shut down
    Shutdown,
}
