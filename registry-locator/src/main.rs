use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use registry_locator::discoverer::Discoverer;
use registry_locator::tracker::BackendTracker;

/// How long a backend stays listed without a fresh beacon.
const STALE_AFTER: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("registry_locator=info")),
        )
        .init();

    let window_secs: u64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(6);

    let mut discoverer = Discoverer::new();
    let (tx, mut rx) = mpsc::channel(64);
    discoverer.start(tx).await?;

    println!("Searching for registry backends ({}s)...", window_secs);

    let mut tracker = BackendTracker::new(STALE_AFTER);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(window_secs);

    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(record)) => {
                if tracker.observe(record.clone()) {
                    println!("  {} (seen {})", record.url, record.last_seen.to_rfc3339());
                }
            }
            // Channel closed or the window elapsed; either way we are done.
            Ok(None) | Err(_) => break,
        }
    }

    discoverer.stop().await;

    if tracker.is_empty() {
        println!("No backends found");
    } else {
        println!("\n{} backend(s) on this network", tracker.len());
    }

    Ok(())
}
