//! The two-stage concurrent crawler.
//!
//! Stage one: fetch workers pop URLs from the ledger queue, crawl them, and
//! publish discovered links into the bounded discovery channel. Stage two:
//! the enqueue manager admits links back into the ledger queue under
//! backpressure. Politeness is per-domain (1-permit semaphore + minimum
//! inter-request interval); correctness across crawler processes rests on
//! the ledger's claim locks, seen set, and chunk refcounts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use inquest_core::config::CrawlerConfig;
use inquest_core::render::RenderClient;
use inquest_core::retry::retry_with_backoff;
use inquest_core::text;
use inquest_core::Error;
use inquest_ledger::{crawl, CrawlingLedger, SHUTDOWN_SENTINEL};
use inquest_memory::VectorStore;

use crate::enqueue::{spawn_enqueue_manager, DiscoverySender};

/// Queue pop timeout; the loop body re-checks the shutdown flag at this
/// cadence.
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// What happened to one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Fresh enough or claimed by a peer.
    Skipped(&'static str),
    /// Content unchanged since the last visit.
    Unchanged,
    /// Indexed; counts of chunk upserts and deletes.
    Indexed { added: usize, removed: usize },
    Failed(String),
}

struct DomainGate {
    permit: Semaphore,
    last_request: Mutex<Option<Instant>>,
}

impl DomainGate {
    fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            last_request: Mutex::new(None),
        }
    }
}

pub struct Crawler {
    config: CrawlerConfig,
    ledger: CrawlingLedger,
    store: VectorStore,
    collection: String,
    renderer: RenderClient,
    gates: Mutex<HashMap<String, Arc<DomainGate>>>,
    discovery: DiscoverySender,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        ledger: CrawlingLedger,
        store: VectorStore,
        collection: String,
        renderer: RenderClient,
        discovery: DiscoverySender,
    ) -> Self {
        Self {
            config,
            ledger,
            store,
            collection,
            renderer,
            gates: Mutex::new(HashMap::new()),
            discovery,
        }
    }

    async fn gate_for(&self, domain: &str) -> Arc<DomainGate> {
        self.gates
            .lock()
            .await
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainGate::new()))
            .clone()
    }

    /// The fetch worker loop: pop, process, repeat until the shutdown
    /// sentinel arrives.
    pub async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "crawl worker started");
        loop {
            let popped = match self.ledger.pop_url(POP_TIMEOUT).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(worker_id, error = %e, "queue pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let Some(url) = popped else {
                continue;
            };
            if url == SHUTDOWN_SENTINEL {
                break;
            }

            info!(worker_id, url, "picked up URL");
            match self.process_url(&url).await {
                Ok(outcome) => debug!(worker_id, url, ?outcome, "crawl finished"),
                Err(e) => {
                    warn!(worker_id, url, error = %e, "crawl errored");
                    let _ = self.ledger.mark_failed(&url, &e.to_string()).await;
                    let _ = self.ledger.release_claim(&url).await;
                }
            }
        }
        debug!(worker_id, "crawl worker stopped");
    }

    /// Crawl one URL end to end. The claim lock is held for the duration
    /// and always released, including on error paths.
    pub async fn process_url(&self, url: &str) -> Result<CrawlOutcome, Error> {
        let url = crawl::normalize_url(url);
        let freshness = Duration::from_secs(self.config.freshness_window_secs);

        // Freshness gate before any locking.
        if self
            .ledger
            .has_been_crawled(&url, Some(freshness))
            .await
            .map_err(Error::from)?
        {
            debug!(url, "skipping, fresh enough");
            return Ok(CrawlOutcome::Skipped("fresh"));
        }

        // Atomic claim; exactly one concurrent crawler wins.
        let claim_ttl = Duration::from_secs(self.config.claim_ttl_secs);
        if !self
            .ledger
            .claim_for_crawling(&url, claim_ttl)
            .await
            .map_err(Error::from)?
        {
            debug!(url, "skipping, claimed by another crawler");
            return Ok(CrawlOutcome::Skipped("locked"));
        }

        let outcome = self.crawl_claimed(&url).await;
        self.ledger.release_claim(&url).await.map_err(Error::from)?;

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.ledger
                    .mark_failed(&url, &e.to_string())
                    .await
                    .map_err(Error::from)?;
                Ok(CrawlOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn crawl_claimed(&self, url: &str) -> Result<CrawlOutcome, Error> {
        self.ledger.mark_in_progress(url).await.map_err(Error::from)?;

        let rendered = self.fetch_with_politeness(url).await?;

        let clean = text::collapse_whitespace(&text::extract_text(&rendered.body));
        if clean.is_empty() {
            return Err(Error::Worker("empty content after parsing".into()));
        }
        let content_hash = text::sha256_hex(&clean);

        // No-change optimization: same hash means a bare last_crawled
        // refresh, no chunk work, no link discovery.
        let previous = self.ledger.get_record(url).await.map_err(Error::from)?;
        if previous.as_ref().and_then(|r| r.content_hash.as_deref()) == Some(content_hash.as_str())
        {
            info!(url, "content unchanged");
            self.ledger
                .mark_visited(url, Some(content_hash), None)
                .await
                .map_err(Error::from)?;
            return Ok(CrawlOutcome::Unchanged);
        }

        // Chunk-level diff against the previous crawl.
        let chunks = chunk_by_hash(&clean, self.config.chunk_size, self.config.chunk_overlap);
        let old_hashes = self.ledger.url_chunks(url).await.map_err(Error::from)?;
        let (to_add, to_remove) = chunk_diff(&chunks, &old_hashes);
        let (added, removed) = (to_add.len(), to_remove.len());

        // Refcount-managed storage: a chunk document exists iff some URL
        // still owns it.
        for hash in &to_remove {
            let count = self.ledger.decr_chunk_ref(hash).await.map_err(Error::from)?;
            if count <= 0 {
                self.store
                    .delete(&self.collection, &[hash.clone()])
                    .await
                    .map_err(Error::from)?;
            }
        }
        for hash in &to_add {
            let count = self.ledger.incr_chunk_ref(hash).await.map_err(Error::from)?;
            if count == 1 {
                let mut metadata = HashMap::new();
                metadata.insert("source".to_string(), serde_json::json!(url));
                metadata.insert("content_hash".to_string(), serde_json::json!(content_hash));
                self.store
                    .upsert(
                        &self.collection,
                        &[(hash.clone(), chunks[hash].clone(), metadata)],
                    )
                    .await
                    .map_err(Error::from)?;
            }
        }

        let add_set: HashSet<String> = to_add.iter().cloned().collect();
        let remove_set: HashSet<String> = to_remove.iter().cloned().collect();
        self.ledger
            .update_url_chunks(url, &add_set, &remove_set)
            .await
            .map_err(Error::from)?;
        self.ledger
            .mark_visited(url, Some(content_hash), None)
            .await
            .map_err(Error::from)?;

        self.discover_links(&rendered.links()).await?;

        info!(url, added, removed, "indexed");
        Ok(CrawlOutcome::Indexed { added, removed })
    }

    /// Hold the domain's single permit, honour the minimum inter-request
    /// interval, then fetch with exponential-backoff retries. An empty body
    /// counts as a failed attempt.
    async fn fetch_with_politeness(
        &self,
        url: &str,
    ) -> Result<inquest_core::render::RenderResponse, Error> {
        let domain = crawl::domain_of(url);
        let gate = self.gate_for(&domain).await;
        let _permit = gate
            .permit
            .acquire()
            .await
            .map_err(|_| Error::ShutdownSignalled)?;

        let interval = Duration::from_millis(self.config.domain_rate_limit_ms);
        {
            let mut last = gate.last_request.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < interval {
                    let delay = interval - elapsed;
                    debug!(domain, delay_ms = delay.as_millis() as u64, "rate limiting");
                    tokio::time::sleep(delay).await;
                }
            }
            *last = Some(Instant::now());
        }

        let renderer = &self.renderer;
        retry_with_backoff(
            self.config.max_retries,
            self.config.retry_backoff_base,
            |attempt| async move {
                debug!(url, attempt, "fetching");
                let rendered = renderer.render(url).await;
                if rendered.is_empty() {
                    Err(Error::Transport(format!("empty body for {url}")))
                } else {
                    Ok(rendered)
                }
            },
        )
        .await
        .map_err(|_| Error::Transport("failed to fetch content after retries".into()))
    }

    /// First-seen URLs go to the enqueue manager; the bounded send is the
    /// backpressure point for this worker.
    async fn discover_links(&self, hrefs: &[String]) -> Result<(), Error> {
        let mut admitted = 0usize;
        for href in hrefs {
            let normalized = crawl::normalize_url(href);
            if normalized.is_empty() {
                continue;
            }
            if self.ledger.mark_seen(&normalized).await.map_err(Error::from)? {
                self.discovery
                    .send(Some(normalized))
                    .await
                    .map_err(|_| Error::ShutdownSignalled)?;
                admitted += 1;
            }
        }
        if admitted > 0 {
            debug!(found = hrefs.len(), admitted, "links discovered");
        }
        Ok(())
    }
}

/// Handle to the running pipeline: fetch workers plus the enqueue manager.
pub struct CrawlerPipeline {
    crawler: Arc<Crawler>,
    workers: Vec<JoinHandle<()>>,
    enqueue_manager: JoinHandle<()>,
    discovery: DiscoverySender,
}

impl CrawlerPipeline {
    /// Build and start the full two-stage pipeline.
    pub fn start(
        config: CrawlerConfig,
        ledger: CrawlingLedger,
        store: VectorStore,
        collection: String,
        renderer: RenderClient,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.discovery_buffer_size);
        let enqueue_manager = spawn_enqueue_manager(ledger.clone(), rx, config.max_queue_size);

        let concurrency = config.concurrency;
        let crawler = Arc::new(Crawler::new(
            config,
            ledger,
            store,
            collection,
            renderer,
            tx.clone(),
        ));

        let workers = (0..concurrency)
            .map(|worker_id| tokio::spawn(crawler.clone().worker_loop(worker_id)))
            .collect();
        info!(workers = concurrency, "crawler pipeline started");

        Self {
            crawler,
            workers,
            enqueue_manager,
            discovery: tx,
        }
    }

    pub fn crawler(&self) -> Arc<Crawler> {
        self.crawler.clone()
    }

    /// Cooperative shutdown: one sentinel per worker, a terminator for the
    /// enqueue manager, then wait for everything.
    pub async fn stop(self) {
        if let Err(e) = self
            .crawler
            .ledger
            .push_shutdown_sentinels(self.workers.len())
            .await
        {
            warn!(error = %e, "failed to push shutdown sentinels");
        }
        let _ = self.discovery.send(None).await;

        for handle in self.workers {
            let _ = handle.await;
        }
        let _ = self.enqueue_manager.await;
        info!("crawler pipeline stopped");
    }
}

// ── Pure helpers ─────────────────────────────────────────────────────

/// Overlapping chunk windows keyed by their content hash.
fn chunk_by_hash(clean: &str, chunk_size: usize, overlap: usize) -> HashMap<String, String> {
    text::split_text(clean, chunk_size, overlap)
        .into_iter()
        .map(|chunk| (text::sha256_hex(&chunk), chunk))
        .collect()
}

/// `to_add = new \ old`, `to_remove = old \ new`.
fn chunk_diff(
    new: &HashMap<String, String>,
    old: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let to_add = new.keys().filter(|h| !old.contains(*h)).cloned().collect();
    let to_remove = old.iter().filter(|h| !new.contains_key(*h)).cloned().collect();
    (to_add, to_remove)
}
