//! Chunk fetcher: one byte range into one part-file.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, FetchError, Result};
use crate::source::RangeSource;
use crate::types::TaskId;

use super::chunks::ChunkSpec;
use super::state::SuspendToken;

/// How a fetcher finished
#[derive(Debug)]
pub(super) enum ChunkOutcome {
    /// Part-file fully written
    Completed { index: usize, bytes: u64 },
    /// Stopped by cancellation; the partial part-file is left behind
    Aborted { index: usize },
    /// Network or I/O failure
    Failed { index: usize, error: Error },
}

/// Fetches one [`ChunkSpec`] into its part-file
pub(super) struct ChunkFetcher {
    pub(super) task_id: TaskId,
    pub(super) url: Url,
    pub(super) spec: ChunkSpec,
    /// False when the server ignores ranges and the single chunk is a plain GET
    pub(super) ranged: bool,
    pub(super) source: Arc<dyn RangeSource>,
    pub(super) block_size: usize,
    pub(super) suspend: SuspendToken,
    pub(super) cancel: CancellationToken,
    /// Task-wide byte counter for progress reporting
    pub(super) downloaded: Arc<AtomicU64>,
}

impl ChunkFetcher {
    pub(super) async fn run(mut self) -> ChunkOutcome {
        let index = self.spec.index;
        match self.fetch().await {
            Ok(Some(bytes)) => ChunkOutcome::Completed { index, bytes },
            Ok(None) => {
                tracing::debug!(task_id = %self.task_id, chunk = index, "Chunk fetch aborted");
                ChunkOutcome::Aborted { index }
            }
            Err(error) => ChunkOutcome::Failed { index, error },
        }
    }

    /// Ok(None) means cancelled
    async fn fetch(&mut self) -> Result<Option<u64>> {
        let index = self.spec.index;
        let range = self.ranged.then(|| self.spec.range());

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            response = self.source.fetch_range(&self.url, range) => response?,
        };
        if range.is_some() && !response.partial {
            return Err(FetchError::RangeIgnored { index }.into());
        }

        let expected = self.spec.length();
        let file = tokio::fs::File::create(&self.spec.part_path).await?;
        let mut writer = BufWriter::with_capacity(self.block_size, file);
        let mut body = response.body;
        let mut received: u64 = 0;

        loop {
            // Network reads never wait on the suspension flag, only writes do
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                next = body.next() => next,
            };
            let Some(bytes) = next else { break };
            let bytes = bytes?;

            received += bytes.len() as u64;
            if received > expected {
                return Err(FetchError::Overrun { index, expected }.into());
            }

            for block in bytes.chunks(self.block_size) {
                if !self.suspend.wait_released(&self.cancel).await {
                    return Ok(None);
                }
                writer.write_all(block).await?;
                self.downloaded
                    .fetch_add(block.len() as u64, Ordering::Relaxed);
            }
        }

        if received < expected {
            return Err(FetchError::ShortBody {
                index,
                expected,
                received,
            }
            .into());
        }

        writer.flush().await?;
        Ok(Some(received))
    }
}
