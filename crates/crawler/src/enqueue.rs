//! Backpressure between discovery and the ledger queue.
//!
//! Fetch workers publish newly seen URLs into a bounded in-memory channel;
//! a single enqueue manager drains it and pushes to the ledger queue,
//! waiting whenever the queue sits at capacity. Producers therefore block
//! on the channel instead of growing the queue without bound.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use inquest_ledger::CrawlingLedger;

/// How long the manager naps while the ledger queue is full.
const FULL_QUEUE_POLL: Duration = Duration::from_millis(200);

/// `Some(url)` to admit a URL; `None` terminates the manager.
pub type DiscoverySender = mpsc::Sender<Option<String>>;

/// Spawn the single enqueue-manager task.
pub fn spawn_enqueue_manager(
    ledger: CrawlingLedger,
    mut rx: mpsc::Receiver<Option<String>>,
    max_queue_size: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(max_queue_size, "enqueue manager started");
        while let Some(item) = rx.recv().await {
            let Some(url) = item else {
                break;
            };

            // Wait for capacity before pushing.
            loop {
                match ledger.queue_len().await {
                    Ok(len) if (len as usize) < max_queue_size => break,
                    Ok(len) => {
                        debug!(len, "crawl queue full, waiting");
                        sleep(FULL_QUEUE_POLL).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "queue length check failed");
                        sleep(FULL_QUEUE_POLL).await;
                    }
                }
            }

            if let Err(e) = ledger.enqueue_urls(&[url.clone()]).await {
                warn!(url, error = %e, "enqueue failed, dropping URL");
            }
        }
        info!("enqueue manager stopped");
    })
}
