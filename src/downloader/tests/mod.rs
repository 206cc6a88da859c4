//! Tests for the download manager.

use super::*;
use crate::downloader::test_helpers::{MemorySource, create_test_manager, test_config, test_data};
use crate::types::{Priority, Status, TaskSnapshot};

use std::time::Duration;


/// Register a download writing into `dir`
async fn add(manager: &DownloadManager, dir: &tempfile::TempDir, id: &str) -> TaskId {
    let request = DownloadRequest::new(
        id,
        &format!("http://example.com/{id}.bin"),
        dir.path().join(format!("{id}.bin")),
    )
    .unwrap();
    manager.add_download(request).await.unwrap()
}

/// Poll until the task reaches `status`
async fn wait_for_status(manager: &DownloadManager, id: &TaskId, status: Status) -> TaskSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = manager.status_of(id).await.unwrap();
            if snapshot.status == status {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} never reached {status}"))
}

/// Poll until the task has written at least one block
async fn wait_for_bytes(manager: &DownloadManager, id: &TaskId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.status_of(id).await.unwrap().downloaded_bytes == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("no bytes were written");
}
