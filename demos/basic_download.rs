//! Basic download example
//!
//! This example demonstrates the core functionality of chunk-dl:
//! - Creating a download manager
//! - Subscribing to events
//! - Registering and starting a chunked download
//! - Pausing and resuming it mid-transfer
//!
//! Usage: `cargo run --example basic_download -- <url> [destination]`

use std::time::Duration;

use chunk_dl::config::{Config, DownloadConfig};
use chunk_dl::{DownloadManager, DownloadRequest, Event};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chunk_dl=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .ok_or("usage: basic_download <url> [destination]")?;
    let destination = args.next().unwrap_or_else(|| "downloads/file.bin".to_string());

    let config = Config {
        download: DownloadConfig {
            max_concurrent_downloads: 2,
            default_chunks: 8,
            ..Default::default()
        },
        ..Default::default()
    };
    let manager = DownloadManager::new(config)?;

    // Print events until the download settles
    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Started {
                    total_bytes,
                    chunks,
                    ..
                } => println!("Started: {total_bytes} bytes in {chunks} chunks"),
                Event::Progress {
                    percent, speed_bps, ..
                } => println!("{percent:5.1}% at {} KiB/s", speed_bps / 1024),
                Event::ChunkComplete { index, bytes, .. } => {
                    println!("Chunk {index} done ({bytes} bytes)")
                }
                Event::Paused { .. } => println!("Paused"),
                Event::Resumed { .. } => println!("Resumed"),
                Event::Retrying {
                    attempt, delay_ms, error, ..
                } => println!("Retrying (attempt {attempt}) in {delay_ms} ms: {error}"),
                Event::Completed { path, .. } => {
                    println!("Completed: {}", path.display());
                    break;
                }
                Event::Failed { error, .. } => {
                    println!("Failed: {error}");
                    break;
                }
                Event::Cancelled { .. } => break,
                _ => {}
            }
        }
    });

    let id = manager
        .add_download(DownloadRequest::new("demo", &url, destination)?)
        .await?;
    manager.start_download(&id).await?;

    // Pause briefly to show that fetchers hold still and pick up where they left off
    tokio::time::sleep(Duration::from_millis(500)).await;
    if manager.pause_download(&id).await? {
        let snapshot = manager.status_of(&id).await?;
        println!("Paused at {:.1}%", snapshot.progress_percent());
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.resume_download(&id).await?;
    }

    manager.shutdown().await?;
    printer.await?;

    let snapshot = manager.status_of(&id).await?;
    println!("Final status: {}", snapshot.status);
    Ok(())
}
