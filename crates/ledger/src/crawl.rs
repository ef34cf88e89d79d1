//! Distributed URL lifecycle state.
//!
//! Every crawler process shares this view through the ledger: per-URL
//! records keyed by domain, atomic claim locks, the global seen-URL set, the
//! crawl queue, reference-counted chunk ownership, and per-URL chunk sets
//! used for re-crawl diffing.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

use inquest_core::text::sha256_hex;

use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Hash namespace holding URL records, keyed by domain.
const NS_CRAWLING: &str = "crawled";
/// FIFO list of normalized URLs pending fetch.
pub const CRAWL_QUEUE: &str = "crawl_queue";
/// Set of every normalized URL ever discovered.
const SEEN_SET: &str = "crawl:seen";
/// Raw integer hash: chunk_hash → owner count.
const CHUNK_REFS: &str = "crawl:chunk_refs";

/// Pushed once per fetch worker at shutdown.
pub const SHUTDOWN_SENTINEL: &str = "shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    New,
    InProgress,
    Visited,
    Failed,
}

/// Per-URL lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub url: String,
    pub domain: String,
    pub status: CrawlStatus,
    /// Unix seconds of the last state change.
    pub last_crawled: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlRecord {
    /// A record is fresh when it changed within the window; without a window
    /// any visited record counts.
    pub fn is_fresh(&self, window: Option<Duration>, now: i64) -> bool {
        match window {
            Some(w) => (now - self.last_crawled) < w.as_secs() as i64,
            None => self.status == CrawlStatus::Visited,
        }
    }
}

/// Canonical form used everywhere a URL is stored or compared:
/// scheme + lowercased host (+ explicit port) + path, with the fragment,
/// query, and trailing slash stripped. Unparseable input passes through
/// trimmed so it still hashes consistently.
pub fn normalize_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return raw.trim().trim_end_matches('/').to_string();
    };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let port = match parsed.port() {
        Some(p) => format!(":{p}"),
        None => String::new(),
    };
    let normalized = format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path());
    normalized.trim_end_matches('/').to_string()
}

/// Lowercased host of a URL; empty for unparseable input.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

fn url_hash(normalized: &str) -> String {
    sha256_hex(normalized)
}

fn lock_key(normalized: &str) -> String {
    format!("crawl_lock:{}", url_hash(normalized))
}

fn chunk_set_key(normalized: &str) -> String {
    format!("crawl:chunks:{}", url_hash(normalized))
}

#[derive(Clone)]
pub struct CrawlingLedger {
    ledger: Ledger,
}

impl CrawlingLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn get_record(&self, url: &str) -> Result<Option<CrawlRecord>, LedgerError> {
        let url = normalize_url(url);
        self.ledger
            .hget(NS_CRAWLING, &domain_of(&url), &url_hash(&url))
            .await
    }

    /// Freshness gate: true when the record exists and is fresh under the
    /// given window (or simply visited, with no window).
    pub async fn has_been_crawled(
        &self,
        url: &str,
        freshness_window: Option<Duration>,
    ) -> Result<bool, LedgerError> {
        match self.get_record(url).await? {
            Some(record) => Ok(record.is_fresh(freshness_window, Utc::now().timestamp())),
            None => Ok(false),
        }
    }

    /// Atomically claim a URL for crawling. Exactly one of any number of
    /// concurrent claimants wins; the lock expires on its TTL regardless of
    /// crashes.
    pub async fn claim_for_crawling(&self, url: &str, lock_ttl: Duration) -> Result<bool, LedgerError> {
        let url = normalize_url(url);
        self.ledger.set_nx_ex(&lock_key(&url), lock_ttl.as_secs()).await
    }

    pub async fn release_claim(&self, url: &str) -> Result<(), LedgerError> {
        let url = normalize_url(url);
        self.ledger.delete(&lock_key(&url)).await
    }

    pub async fn mark_in_progress(&self, url: &str) -> Result<(), LedgerError> {
        self.update_status(url, CrawlStatus::InProgress, None, None, None).await
    }

    pub async fn mark_visited(
        &self,
        url: &str,
        content_hash: Option<String>,
        etag: Option<String>,
    ) -> Result<(), LedgerError> {
        self.update_status(url, CrawlStatus::Visited, content_hash, etag, None)
            .await
    }

    pub async fn mark_failed(&self, url: &str, error: &str) -> Result<(), LedgerError> {
        self.update_status(url, CrawlStatus::Failed, None, None, Some(error.to_string()))
            .await
    }

    async fn update_status(
        &self,
        url: &str,
        status: CrawlStatus,
        content_hash: Option<String>,
        etag: Option<String>,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        let url = normalize_url(url);
        let domain = domain_of(&url);
        let record = CrawlRecord {
            url: url.clone(),
            domain: domain.clone(),
            status,
            last_crawled: Utc::now().timestamp(),
            content_hash,
            etag,
            error,
        };
        self.ledger.hset(NS_CRAWLING, &domain, &url_hash(&url), &record).await
    }

    // ── Seen set ─────────────────────────────────────────────────────

    /// Insert into the global seen set; true only on first discovery.
    pub async fn mark_seen(&self, url: &str) -> Result<bool, LedgerError> {
        let url = normalize_url(url);
        Ok(self.ledger.sadd(SEEN_SET, &url).await? == 1)
    }

    // ── Chunk refcounts & per-URL chunk sets ─────────────────────────

    /// Increment a chunk's owner count; the returned value is 1 exactly when
    /// this caller created the chunk.
    pub async fn incr_chunk_ref(&self, chunk_hash: &str) -> Result<i64, LedgerError> {
        self.ledger.hincrby(CHUNK_REFS, chunk_hash, 1).await
    }

    /// Decrement a chunk's owner count; at zero or below the counter entry
    /// is removed and the chunk should be deleted from the vector store.
    pub async fn decr_chunk_ref(&self, chunk_hash: &str) -> Result<i64, LedgerError> {
        let count = self.ledger.hincrby(CHUNK_REFS, chunk_hash, -1).await?;
        if count <= 0 {
            self.ledger.hdel_raw(CHUNK_REFS, chunk_hash).await?;
        }
        Ok(count)
    }

    /// Chunk hashes currently indexed for a URL.
    pub async fn url_chunks(&self, url: &str) -> Result<HashSet<String>, LedgerError> {
        let url = normalize_url(url);
        Ok(self
            .ledger
            .smembers(&chunk_set_key(&url))
            .await?
            .into_iter()
            .collect())
    }

    /// Apply a re-crawl diff to the URL's chunk set.
    pub async fn update_url_chunks(
        &self,
        url: &str,
        to_add: &HashSet<String>,
        to_remove: &HashSet<String>,
    ) -> Result<(), LedgerError> {
        let url = normalize_url(url);
        let key = chunk_set_key(&url);
        for hash in to_remove {
            self.ledger.srem(&key, hash).await?;
        }
        for hash in to_add {
            self.ledger.sadd(&key, hash).await?;
        }
        Ok(())
    }

    // ── Crawl queue ──────────────────────────────────────────────────

    pub async fn enqueue_urls(&self, urls: &[String]) -> Result<i64, LedgerError> {
        if urls.is_empty() {
            return self.queue_len().await;
        }
        self.ledger.lpush(CRAWL_QUEUE, urls).await
    }

    pub async fn pop_url(&self, timeout: Duration) -> Result<Option<String>, LedgerError> {
        self.ledger.brpop(CRAWL_QUEUE, timeout.as_secs_f64()).await
    }

    pub async fn queue_len(&self) -> Result<i64, LedgerError> {
        self.ledger.llen(CRAWL_QUEUE).await
    }

    pub async fn clear_queue(&self) -> Result<(), LedgerError> {
        self.ledger.delete(CRAWL_QUEUE).await
    }

    /// One sentinel per fetch worker unblocks every `pop_url` loop.
    pub async fn push_shutdown_sentinels(&self, workers: usize) -> Result<(), LedgerError> {
        let sentinels = vec![SHUTDOWN_SENTINEL.to_string(); workers];
        self.ledger.lpush(CRAWL_QUEUE, &sentinels).await?;
        Ok(())
    }
}
