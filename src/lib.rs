//! # chunk-dl
//!
//! Concurrent, resumable, chunked HTTP download engine.
//!
//! Each download is split into byte-range chunks fetched in parallel into
//! part-files, then merged in order into the destination. Downloads can be
//! paused, resumed and cancelled while running; failed attempts are retried with
//! exponential backoff. A [`DownloadManager`] keeps a registry of tasks and runs
//! them on a bounded worker pool.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chunk_dl::{Config, DownloadManager, DownloadRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = DownloadManager::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = DownloadRequest::new(
//!         "release",
//!         "https://example.com/release.tar.gz",
//!         "downloads/release.tar.gz",
//!     )?
//!     .chunks(8);
//!     let id = manager.add_download(request).await?;
//!     manager.start_download(&id).await?;
//!
//!     // Waits for every running download to settle
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Download manager and per-task execution
pub mod downloader;
/// Error types
pub mod error;
/// Retry logic with exponential backoff
pub mod retry;
/// Byte-range sources (HTTP and pluggable)
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, HttpConfig, RetryConfig};
pub use downloader::{DownloadManager, DownloadTask};
pub use error::{Error, FetchError, Result};
pub use retry::{Backoff, IsRetryable, RetryPolicy};
pub use source::{
    ByteRange, ByteStream, HttpRangeSource, RangeResponse, RangeSource, ResourceInfo,
};
pub use types::{DownloadRequest, Event, Priority, Status, TaskId, TaskSnapshot};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal and then calls the manager's `shutdown()` method,
/// which lets running downloads finish.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use chunk_dl::{Config, DownloadManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = DownloadManager::new(Config::default())?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(manager).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: DownloadManager) -> Result<()> {
    wait_for_signal().await;
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
