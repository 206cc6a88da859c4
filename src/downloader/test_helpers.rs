//! Shared test helpers: an in-memory range source and manager construction.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use url::Url;

use crate::config::{Config, RetryConfig};
use crate::downloader::DownloadManager;
use crate::error::{Error, Result};
use crate::source::{ByteRange, RangeResponse, RangeSource, ResourceInfo};

/// Serves the same bytes for every URL, with knobs for failures and pacing
pub(crate) struct MemorySource {
    pub(crate) data: Vec<u8>,
    pub(crate) accepts_ranges: bool,
    /// Answer ranged fetches with the whole body, like a server that ignores Range
    pub(crate) ignore_ranges: bool,
    /// Fetches fail while the probe count is at or below this
    pub(crate) fail_attempts: u32,
    pub(crate) piece_size: usize,
    pub(crate) piece_delay: Option<Duration>,
    probes: AtomicU32,
    fetches: Mutex<Vec<Option<ByteRange>>>,
}

impl MemorySource {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            accepts_ranges: true,
            ignore_ranges: false,
            fail_attempts: 0,
            piece_size: 1000,
            piece_delay: None,
            probes: AtomicU32::new(0),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Deliver bodies slowly so tests can act mid-transfer
    pub(crate) fn slow(mut self) -> Self {
        self.piece_delay = Some(Duration::from_millis(2));
        self
    }

    pub(crate) fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Requested ranges sorted by start offset
    pub(crate) fn fetched_ranges(&self) -> Vec<Option<ByteRange>> {
        let mut ranges = self.fetches.lock().unwrap().clone();
        ranges.sort_by_key(|r| r.map(|r| r.start));
        ranges
    }
}

#[async_trait::async_trait]
impl RangeSource for MemorySource {
    async fn probe(&self, _url: &Url) -> Result<ResourceInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(ResourceInfo {
            content_length: self.data.len() as u64,
            accepts_ranges: self.accepts_ranges,
        })
    }

    async fn fetch_range(&self, _url: &Url, range: Option<ByteRange>) -> Result<RangeResponse> {
        self.fetches.lock().unwrap().push(range);
        if self.probes() <= self.fail_attempts {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected failure",
            )));
        }

        let (slice, partial) = match range {
            Some(r) if !self.ignore_ranges => (&self.data[r.start as usize..=r.end as usize], true),
            _ => (&self.data[..], false),
        };
        let pieces: Vec<Bytes> = slice
            .chunks(self.piece_size)
            .map(Bytes::copy_from_slice)
            .collect();
        let delay = self.piece_delay;
        let body = futures::stream::iter(pieces)
            .then(move |piece| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, Error>(piece)
            })
            .boxed();

        Ok(RangeResponse { partial, body })
    }
}

/// Deterministic, non-repeating-ish payload
pub(crate) fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 256) as u8).collect()
}

/// Retry settings with millisecond backoff and no jitter
pub(crate) fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Config tuned for tests: small blocks, quick progress ticks, fast retries
pub(crate) fn test_config(max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.download.max_concurrent_downloads = max_concurrent;
    config.download.block_size = 512;
    config.download.progress_interval_ms = 20;
    config.retry = fast_retry();
    config
}

/// Helper to create a manager over an in-memory source.
/// Returns the manager, the source and the tempdir (which must be kept alive).
pub(crate) fn create_test_manager(
    config: Config,
    source: MemorySource,
) -> (DownloadManager, Arc<MemorySource>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = Arc::new(source);
    let manager = DownloadManager::with_source(config, source.clone()).unwrap();
    (manager, source, temp_dir)
}
