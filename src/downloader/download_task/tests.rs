//! Tests for the download task module.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::RetryConfig;
use crate::downloader::test_helpers::{MemorySource, fast_retry, test_data};
use crate::error::{Error, FetchError, Result};
use crate::source::ByteRange;
use crate::types::{DownloadRequest, Event, Status};

use super::chunks::{ChunkSpec, merge_path, part_path, plan_chunks};
use super::finalization::stage_parts;
use super::{DownloadTask, TaskContext};

struct Harness {
    task: Arc<DownloadTask>,
    source: Arc<MemorySource>,
    events: broadcast::Receiver<Event>,
    dest: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn harness(source: MemorySource, chunks: usize, max_retries: u32, retry: RetryConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("file.bin");
    let source = Arc::new(source);
    let (event_tx, events) = broadcast::channel(1000);
    let ctx = TaskContext {
        source: source.clone(),
        event_tx,
        block_size: 512,
        progress_interval: Duration::from_millis(20),
        retry,
    };
    let request = DownloadRequest::new("task-1", "http://example.com/file.bin", &dest).unwrap();
    let task = Arc::new(DownloadTask::new(request, chunks, max_retries, ctx));
    Harness {
        task,
        source,
        events,
        dest,
        _dir: dir,
    }
}

fn spawn_start(task: &Arc<DownloadTask>) -> tokio::task::JoinHandle<Result<()>> {
    let task = task.clone();
    tokio::spawn(async move { task.start().await })
}

async fn join(handle: tokio::task::JoinHandle<Result<()>>) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("task did not settle in time")
        .expect("task panicked")
}

async fn wait_for_bytes(task: &DownloadTask) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while task.status().downloaded_bytes == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("no bytes were written");
}

/// Buffered events, minus the timing-dependent progress reports
fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !matches!(event, Event::Progress { .. }) {
            out.push(event);
        }
    }
    out
}

// -----------------------------------------------------------------------
// Chunked fetch and merge
// -----------------------------------------------------------------------

#[tokio::test]
async fn million_bytes_in_four_chunks_merges_identically() {
    let data = test_data(1_000_000);
    let h = harness(MemorySource::new(data.clone()), 4, 3, fast_retry());

    h.task.start().await.unwrap();

    assert_eq!(
        h.source.fetched_ranges(),
        vec![
            Some(ByteRange::new(0, 249_999)),
            Some(ByteRange::new(250_000, 499_999)),
            Some(ByteRange::new(500_000, 749_999)),
            Some(ByteRange::new(750_000, 999_999)),
        ]
    );
    assert_eq!(tokio::fs::read(&h.dest).await.unwrap(), data);

    let snapshot = h.task.status();
    assert_eq!(snapshot.status, Status::Completed);
    assert_eq!(snapshot.progress, 1.0);
    assert_eq!(snapshot.total_bytes, 1_000_000);
    for index in 0..4 {
        assert!(!part_path(&h.dest, index).exists(), "part{index} should be deleted");
    }
}

#[tokio::test]
async fn completed_run_emits_lifecycle_events() {
    let mut h = harness(MemorySource::new(test_data(10_000)), 4, 3, fast_retry());

    h.task.start().await.unwrap();
    let events = drain(&mut h.events);

    assert!(matches!(
        events.first(),
        Some(Event::Started { attempt: 1, total_bytes: 10_000, chunks: 4, .. })
    ));
    let chunk_events = events
        .iter()
        .filter(|e| matches!(e, Event::ChunkComplete { .. }))
        .count();
    assert_eq!(chunk_events, 4);
    assert!(matches!(events.last(), Some(Event::Completed { .. })));
}

#[tokio::test]
async fn server_without_ranges_degrades_to_single_chunk() {
    let data = test_data(5_000);
    let mut source = MemorySource::new(data.clone());
    source.accepts_ranges = false;
    let h = harness(source, 4, 3, fast_retry());

    h.task.start().await.unwrap();

    assert_eq!(h.source.fetched_ranges(), vec![None]);
    assert_eq!(tokio::fs::read(&h.dest).await.unwrap(), data);
    assert_eq!(h.task.status().status, Status::Completed);
}

#[tokio::test]
async fn empty_resource_completes_with_empty_file() {
    let h = harness(MemorySource::new(Vec::new()), 4, 3, fast_retry());

    h.task.start().await.unwrap();

    assert!(h.source.fetched_ranges().is_empty());
    assert_eq!(tokio::fs::metadata(&h.dest).await.unwrap().len(), 0);
    assert_eq!(h.task.status().status, Status::Completed);
}

#[tokio::test]
async fn range_ignored_by_server_fails_without_retry() {
    let mut source = MemorySource::new(test_data(4_000));
    source.ignore_ranges = true;
    let h = harness(source, 2, 3, fast_retry());

    let err = h.task.start().await.unwrap_err();

    assert!(
        matches!(err, Error::Fetch(FetchError::RangeIgnored { .. })),
        "got {err:?}"
    );
    assert_eq!(h.source.probes(), 1, "non-retryable failure must not retry");
    assert_eq!(h.task.status().status, Status::Failed);
    assert!(!h.dest.exists());
}

// -----------------------------------------------------------------------
// Pause / resume
// -----------------------------------------------------------------------

#[tokio::test]
async fn paused_then_resumed_task_produces_same_content() {
    let data = test_data(200_000);
    let h = harness(MemorySource::new(data.clone()).slow(), 4, 3, fast_retry());

    let runner = spawn_start(&h.task);
    wait_for_bytes(&h.task).await;

    assert!(h.task.pause());
    assert_eq!(h.task.status().status, Status::Paused);
    assert!(!h.task.pause(), "second pause is a no-op");

    // Let in-flight writes drain, then the byte count must hold still
    tokio::time::sleep(Duration::from_millis(50)).await;
    let parked = h.task.status().downloaded_bytes;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.task.status().downloaded_bytes, parked, "fetchers wrote while paused");
    assert!(parked < data.len() as u64);

    assert!(h.task.resume());
    join(runner).await.unwrap();

    assert_eq!(h.task.status().status, Status::Completed);
    assert_eq!(tokio::fs::read(&h.dest).await.unwrap(), data);
    assert_eq!(h.source.probes(), 1, "resume must not re-launch the attempt");
}

#[tokio::test]
async fn start_on_paused_task_resumes_it() {
    let data = test_data(100_000);
    let h = harness(MemorySource::new(data.clone()).slow(), 2, 3, fast_retry());

    let runner = spawn_start(&h.task);
    wait_for_bytes(&h.task).await;
    assert!(h.task.pause());

    h.task.start().await.unwrap();
    assert_eq!(h.task.status().status, Status::InProgress);

    join(runner).await.unwrap();
    assert_eq!(tokio::fs::read(&h.dest).await.unwrap(), data);
}

#[tokio::test]
async fn pause_and_resume_outside_running_are_no_ops() {
    let h = harness(MemorySource::new(test_data(100)), 1, 3, fast_retry());

    assert!(!h.task.pause(), "created task cannot pause");
    assert!(!h.task.resume(), "created task cannot resume");
    assert_eq!(h.task.status().status, Status::Created);

    h.task.start().await.unwrap();
    assert!(!h.task.pause());
    assert!(!h.task.resume());
    assert_eq!(h.task.status().status, Status::Completed);
}

// -----------------------------------------------------------------------
// Cancellation
// -----------------------------------------------------------------------

#[tokio::test]
async fn cancel_in_progress_task_is_terminal() {
    let h = harness(MemorySource::new(test_data(200_000)).slow(), 4, 3, fast_retry());

    let runner = spawn_start(&h.task);
    wait_for_bytes(&h.task).await;

    assert!(h.task.cancel());
    join(runner).await.unwrap();

    assert_eq!(h.task.status().status, Status::Cancelled);
    assert!(!h.task.cancel(), "second cancel is a no-op");
    assert!(!h.task.resume());
    h.task.start().await.unwrap();
    assert_eq!(h.task.status().status, Status::Cancelled);
    assert!(!h.dest.exists(), "cancelled task must not merge");
}

#[tokio::test]
async fn cancel_while_paused_releases_fetchers() {
    let h = harness(MemorySource::new(test_data(200_000)).slow(), 4, 3, fast_retry());

    let runner = spawn_start(&h.task);
    wait_for_bytes(&h.task).await;
    assert!(h.task.pause());

    assert!(h.task.cancel());
    join(runner).await.unwrap();
    assert_eq!(h.task.status().status, Status::Cancelled);
}

#[tokio::test]
async fn cancel_before_start_prevents_any_fetch() {
    let h = harness(MemorySource::new(test_data(1_000)), 2, 3, fast_retry());

    assert!(h.task.cancel());
    h.task.start().await.unwrap();

    assert_eq!(h.source.probes(), 0);
    assert_eq!(h.task.status().status, Status::Cancelled);
}

#[tokio::test]
async fn cancel_during_backoff_stops_retry_loop() {
    let mut source = MemorySource::new(test_data(1_000));
    source.fail_attempts = u32::MAX;
    let retry = RetryConfig {
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        ..fast_retry()
    };
    let mut h = harness(source, 2, 3, retry);

    let runner = spawn_start(&h.task);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Event::Retrying { .. }) = h.events.recv().await {
                return;
            }
        }
    })
    .await
    .expect("no retry scheduled");

    let waiting = h.task.status();
    assert_eq!(waiting.status, Status::Failed);
    assert!(waiting.retry_pending);
    assert!(!waiting.is_settled());
    assert!(h.task.cancel(), "a pending retry can be cancelled");
    join(runner).await.unwrap();

    assert_eq!(h.task.status().status, Status::Cancelled);
    assert_eq!(h.source.probes(), 1);
}

// -----------------------------------------------------------------------
// Retry
// -----------------------------------------------------------------------

#[tokio::test]
async fn two_retries_are_granted_then_the_task_fails() {
    let mut source = MemorySource::new(test_data(8_000));
    source.fail_attempts = u32::MAX;
    let mut h = harness(source, 4, 2, fast_retry());

    let err = h.task.start().await.unwrap_err();

    assert!(
        matches!(err, Error::RetriesExhausted { attempts: 3, .. }),
        "got {err:?}"
    );
    assert_eq!(h.source.probes(), 3, "first attempt plus two retries, no third retry");

    let snapshot = h.task.status();
    assert_eq!(snapshot.status, Status::Failed);
    assert_eq!(snapshot.retry_count, 2);
    assert!(!snapshot.retry_pending);
    assert!(snapshot.is_settled());
    assert!(snapshot.last_error.is_some());
    assert!(!h.dest.exists());

    let events = drain(&mut h.events);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::Retrying { .. }))
            .count(),
        2
    );
    assert!(matches!(events.last(), Some(Event::Failed { .. })));

    // Failed is terminal for callers
    assert!(matches!(
        h.task.start().await,
        Err(Error::InvalidState { current_state: Status::Failed, .. })
    ));
    assert!(!h.task.cancel());
}

#[tokio::test]
async fn single_retry_budget_recovers_from_one_failure() {
    let data = test_data(6_000);
    let mut source = MemorySource::new(data.clone());
    source.fail_attempts = 1;
    let h = harness(source, 3, 1, fast_retry());

    h.task.start().await.unwrap();

    assert_eq!(h.source.probes(), 2);
    let snapshot = h.task.status();
    assert_eq!(snapshot.status, Status::Completed);
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(tokio::fs::read(&h.dest).await.unwrap(), data);
}

#[tokio::test]
async fn non_retryable_failure_records_no_retry() {
    let mut source = MemorySource::new(test_data(2_000));
    source.ignore_ranges = true;
    let h = harness(source, 2, 3, fast_retry());

    h.task.start().await.unwrap_err();

    assert_eq!(h.task.status().retry_count, 0);
}

#[tokio::test]
async fn oversized_backoff_multiplier_settles_instead_of_panicking() {
    let mut source = MemorySource::new(test_data(1_000));
    source.fail_attempts = u32::MAX;
    let retry = RetryConfig {
        backoff_multiplier: 1e30,
        ..fast_retry()
    };
    let h = harness(source, 2, 3, retry);

    let err = join(spawn_start(&h.task)).await.unwrap_err();

    assert!(matches!(err, Error::RetriesExhausted { attempts: 4, .. }), "got {err:?}");
    assert!(h.task.status().is_settled());
    assert!(!h.task.is_busy());
}

#[tokio::test]
async fn transient_failure_is_retried_from_scratch() {
    let data = test_data(20_000);
    let mut source = MemorySource::new(data.clone());
    source.fail_attempts = 1;
    let h = harness(source, 4, 3, fast_retry());

    h.task.start().await.unwrap();

    assert_eq!(h.source.probes(), 2, "retry re-probes the source");
    let snapshot = h.task.status();
    assert_eq!(snapshot.status, Status::Completed);
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(tokio::fs::read(&h.dest).await.unwrap(), data);
}

#[tokio::test]
async fn zero_retries_fails_after_first_attempt() {
    let mut source = MemorySource::new(test_data(1_000));
    source.fail_attempts = u32::MAX;
    let h = harness(source, 2, 0, fast_retry());

    let err = h.task.start().await.unwrap_err();

    assert!(matches!(err, Error::RetriesExhausted { attempts: 1, .. }));
    assert_eq!(h.source.probes(), 1);
    assert_eq!(h.task.status().retry_count, 0);
}

// -----------------------------------------------------------------------
// Commit of the merged file
// -----------------------------------------------------------------------

/// Write every planned part-file and stage the merged file
async fn staged(h: &Harness, data: &[u8], chunks: usize) -> Vec<ChunkSpec> {
    tokio::fs::create_dir_all(h.dest.parent().unwrap()).await.unwrap();
    let plan = plan_chunks(data.len() as u64, chunks, &h.dest);
    for chunk in &plan {
        let slice = &data[chunk.start as usize..=chunk.end as usize];
        tokio::fs::write(&chunk.part_path, slice).await.unwrap();
    }
    stage_parts(&plan, &h.dest, 512).await.unwrap();
    plan
}

#[tokio::test]
async fn cancel_before_commit_keeps_destination_absent() {
    let data = test_data(3_000);
    let h = harness(MemorySource::new(data.clone()), 3, 3, fast_retry());
    let plan = staged(&h, &data, 3).await;

    assert!(h.task.cancel());
    let committed = h.task.commit_merge(&plan).await.unwrap();

    assert!(!committed);
    assert!(!h.dest.exists(), "cancelled task must not publish the destination");
    assert!(!merge_path(&h.dest).exists(), "staging file is discarded");
    assert!(plan.iter().all(|chunk| chunk.part_path.exists()));
    assert_eq!(h.task.status().status, Status::Cancelled);
}

#[tokio::test]
async fn commit_renames_and_completes_together() {
    let data = test_data(3_000);
    let h = harness(MemorySource::new(data.clone()), 3, 3, fast_retry());
    let plan = staged(&h, &data, 3).await;
    assert!(h.task.state.transition(Status::Created, Status::InProgress));

    let committed = h.task.commit_merge(&plan).await.unwrap();

    assert!(committed);
    assert_eq!(h.task.status().status, Status::Completed);
    assert_eq!(tokio::fs::read(&h.dest).await.unwrap(), data);
    assert!(!h.task.cancel(), "completed task cannot be cancelled afterwards");
    assert!(plan.iter().all(|chunk| !chunk.part_path.exists()));
}
