//! Chunk planning: byte-range partitioning and part-file naming.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::source::ByteRange;

/// One contiguous byte range of the target file and the part-file that holds it
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChunkSpec {
    pub(crate) index: usize,
    /// First byte offset
    pub(crate) start: u64,
    /// Last byte offset (inclusive)
    pub(crate) end: u64,
    pub(crate) part_path: PathBuf,
}

impl ChunkSpec {
    pub(crate) fn range(&self) -> ByteRange {
        ByteRange::new(self.start, self.end)
    }

    pub(crate) fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Split `total` bytes into `chunks` contiguous ranges
///
/// Chunk `i` starts at `i * (total / chunks)`; the last chunk absorbs the remainder.
/// The chunk count is clamped to `1..=total`, and an empty resource has no chunks.
pub(crate) fn plan_chunks(total: u64, chunks: usize, destination: &Path) -> Vec<ChunkSpec> {
    if total == 0 {
        return Vec::new();
    }

    let count = (chunks.max(1) as u64).min(total);
    let chunk_size = total / count;

    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == count - 1 {
                total - 1
            } else {
                start + chunk_size - 1
            };
            let index = i as usize;
            ChunkSpec {
                index,
                start,
                end,
                part_path: part_path(destination, index),
            }
        })
        .collect()
}

/// `<dest>.part<i>`
pub(crate) fn part_path(destination: &Path, index: usize) -> PathBuf {
    with_suffix(destination, &format!(".part{index}"))
}

/// Temporary sibling the merge writes before renaming onto the destination
pub(crate) fn merge_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".merging")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
