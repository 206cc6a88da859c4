//! Merge finalization: reassemble part-files into the destination.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use crate::error::{Error, Result};

use super::chunks::{ChunkSpec, merge_path};

/// Concatenate part-files in ascending chunk order into `<dest>.merging`
///
/// The destination itself is untouched until [`commit_staged`] renames the staging
/// file onto it, so readers never see a half-merged file. On failure the staging
/// file is removed and the part-files stay. Returns the number of bytes written.
pub(super) async fn stage_parts(
    plan: &[ChunkSpec],
    destination: &Path,
    block_size: usize,
) -> Result<u64> {
    let staging = merge_path(destination);
    match copy_parts(plan, &staging, block_size).await {
        Ok(written) => Ok(written),
        Err(source) => {
            tokio::fs::remove_file(&staging).await.ok();
            Err(Error::Merge {
                path: destination.to_path_buf(),
                source,
            })
        }
    }
}

/// Rename the staging file onto the destination
///
/// Synchronous so callers can hold a std lock across it; a rename within one
/// directory is a single metadata operation.
pub(super) fn commit_staged(destination: &Path) -> Result<()> {
    let staging = merge_path(destination);
    std::fs::rename(&staging, destination).map_err(|source| {
        std::fs::remove_file(&staging).ok();
        Error::Merge {
            path: destination.to_path_buf(),
            source,
        }
    })
}

/// Drop a staging file that will never be committed
pub(super) async fn discard_staged(destination: &Path) {
    let staging = merge_path(destination);
    if let Err(e) = tokio::fs::remove_file(&staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %staging.display(), error = %e, "Failed to delete staging file");
        }
    }
}

/// Delete part-files once their bytes are in the destination
pub(super) async fn remove_parts(plan: &[ChunkSpec]) {
    for chunk in plan {
        if let Err(e) = tokio::fs::remove_file(&chunk.part_path).await {
            tracing::warn!(
                path = %chunk.part_path.display(),
                error = %e,
                "Failed to delete part-file after merge"
            );
        }
    }
}

async fn copy_parts(plan: &[ChunkSpec], staging: &Path, block_size: usize) -> std::io::Result<u64> {
    let mut ordered: Vec<&ChunkSpec> = plan.iter().collect();
    ordered.sort_by_key(|chunk| chunk.index);

    let file = tokio::fs::File::create(staging).await?;
    let mut out = BufWriter::new(file);
    let mut buf = vec![0u8; block_size.max(1)];
    let mut written: u64 = 0;

    for chunk in ordered {
        let mut part = tokio::fs::File::open(&chunk.part_path).await?;
        loop {
            let n = part.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
            written += n as u64;
        }
    }

    out.flush().await?;
    out.into_inner().sync_all().await?;
    Ok(written)
}
