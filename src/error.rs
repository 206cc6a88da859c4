//! Error types for chunk-dl
//!
//! A single crate-level [`Error`] covers every fallible operation. Failures that
//! happen while fetching an individual chunk are described by [`FetchError`] and
//! surface as [`Error::Fetch`].

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Status, TaskId};

/// Result type alias for chunk-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chunk-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "block_size")
        key: Option<String>,
    },

    /// Malformed input such as an unparseable URL
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Task ID is not registered
    #[error("download task {0} not found")]
    NotFound(TaskId),

    /// Task ID is already registered
    #[error("download task {0} already exists")]
    Duplicate(TaskId),

    /// Operation not valid for the task's current status
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task the operation targeted
        id: TaskId,
        /// The operation that was attempted (e.g., "start", "resume", "remove")
        operation: &'static str,
        /// The status that prevents the operation
        current_state: Status,
    },

    /// HTTP transport error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A chunk fetch or metadata probe produced an unusable response
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Reassembling part-files into the destination failed
    #[error("failed to merge chunks into {path}: {source}")]
    Merge {
        /// Destination being written
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The retry policy ran out of attempts
    #[error("task {id} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// The task that gave up
        id: TaskId,
        /// Attempts made, including the first
        attempts: u32,
        /// Error that failed the final attempt
        last_error: String,
    },

    /// I/O error (part-file writes, directory creation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,
}

impl Error {
    /// True for failures of the network-failure class: transport errors, unusable
    /// responses and chunk I/O errors.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Fetch(_) | Error::Io(_))
    }
}

/// Problems with a probe or range response
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("server returned HTTP {status} for {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Server replied with the full body to a range request
    #[error("server ignored the range request for chunk {index}")]
    RangeIgnored {
        /// Chunk index
        index: usize,
    },

    /// Response body ended before the chunk's range was filled
    #[error("chunk {index} ended early: expected {expected} bytes, received {received}")]
    ShortBody {
        /// Chunk index
        index: usize,
        /// Bytes in the requested range
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Response body ran past the chunk's range
    #[error("chunk {index} received more than the expected {expected} bytes")]
    Overrun {
        /// Chunk index
        index: usize,
        /// Bytes in the requested range
        expected: u64,
    },

    /// Neither the probe nor the ranged fallback reported a length
    #[error("{url} did not report a content length")]
    MissingLength {
        /// Probed URL
        url: String,
    },
}

impl FetchError {
    /// Transient server-side statuses worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            FetchError::ShortBody { .. } => true,
            FetchError::RangeIgnored { .. }
            | FetchError::Overrun { .. }
            | FetchError::MissingLength { .. } => false,
        }
    }
}
