use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub chroma: ChromaConfig,
    pub llm: LlmConfig,
    pub renderer: RendererConfig,
    pub gateway: GatewayConfig,
    pub namespace: NamespaceConfig,
    pub crawler: CrawlerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig::from_env(),
            chroma: ChromaConfig::from_env(),
            llm: LlmConfig::from_env(),
            renderer: RendererConfig::from_env(),
            gateway: GatewayConfig::from_env(),
            namespace: NamespaceConfig::from_env(),
            crawler: CrawlerConfig::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  redis:     {}:{}", self.redis.host, self.redis.port);
        tracing::info!("  chroma:    {} (batch={})", self.chroma.url, self.chroma.batch_size);
        tracing::info!("  llm:       {}", self.llm.base_url);
        tracing::info!("  renderer:  {}", self.renderer.url);
        tracing::info!("  gateway:   {}", self.gateway.submit_url);
        tracing::info!("  chat:      {}", self.gateway.chat_server_url);
        tracing::info!(
            "  crawler:   workers={}, rate_limit={}ms, queue_max={}",
            self.crawler.concurrency,
            self.crawler.domain_rate_limit_ms,
            self.crawler.max_queue_size
        );
    }
}

// ── Redis (ledger) ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("REDIS_HOST", "localhost"),
            port: env_opt("REDIS_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(6379),
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

// ── Chroma (vector store) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromaConfig {
    pub url: String,
    pub batch_size: usize,
}

impl ChromaConfig {
    fn from_env() -> Self {
        Self {
            url: env_or("CHROMA_URL", "http://localhost:8000"),
            batch_size: env_usize("CHROMA_BATCH_SIZE", 500),
        }
    }
}

// ── LLM (Ollama-compatible) ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the Ollama-compatible API.
    pub base_url: String,
    /// Default model when the per-agent registry has no entry.
    pub default_model: String,
}

impl LlmConfig {
    fn from_env() -> Self {
        // OLLAMA_BASE_URL is authoritative; LLM_URL is the legacy name and
        // may point directly at the /api/chat endpoint.
        let base_url = env_opt("OLLAMA_BASE_URL")
            .or_else(|| env_opt("LLM_URL").map(|u| u.trim_end_matches("/api/chat").to_string()))
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Self {
            base_url,
            default_model: env_or("LLM_MODEL", "llama3.2"),
        }
    }
}

// ── Renderer (web perceptor) ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    pub url: String,
    /// Page render budget handed to the service, in milliseconds.
    pub timeout_ms: u64,
}

impl RendererConfig {
    fn from_env() -> Self {
        Self {
            url: env_or("WEB_PERCEPTOR_URL", "http://localhost:8011/render"),
            timeout_ms: env_u64("WEB_PERCEPTOR_TIMEOUT_MS", 15_000),
        }
    }
}

// ── Gateway / chat server ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Where the chat server submits user queries.
    pub submit_url: String,
    /// Where the gateway posts formatted results.
    pub chat_server_url: String,
}

impl GatewayConfig {
    fn from_env() -> Self {
        Self {
            submit_url: env_or("GATEWAY_ADDRESS", "http://127.0.0.1:9000/submit"),
            chat_server_url: env_or("CHAT_SERVER_URL", "http://127.0.0.1:8080/api/result"),
        }
    }
}

// ── Namespaces ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub version: String,
    pub tenant: String,
}

impl NamespaceConfig {
    fn from_env() -> Self {
        Self {
            version: env_or("NAMESPACE_VERSION", "v1"),
            tenant: env_or("DEFAULT_TENANT", "com"),
        }
    }
}

// ── Crawler tuning ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Number of fetch workers.
    pub concurrency: usize,
    /// Minimum interval between requests to the same domain.
    pub domain_rate_limit_ms: u64,
    /// Fetch attempts per URL.
    pub max_retries: u32,
    /// Exponential backoff base in seconds (`base^attempt`).
    pub retry_backoff_base: u64,
    /// Overlapping chunk window parameters.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Skip re-crawling URLs visited within this window.
    pub freshness_window_secs: u64,
    /// Bounded in-memory discovery channel capacity.
    pub discovery_buffer_size: usize,
    /// Ledger queue length above which the enqueue manager waits.
    pub max_queue_size: usize,
    /// Per-URL claim lock TTL.
    pub claim_ttl_secs: u64,
    /// Admin HTTP port.
    pub port: u16,
}

impl CrawlerConfig {
    fn from_env() -> Self {
        Self {
            concurrency: env_usize("CRAWLER_CONCURRENCY", 10),
            domain_rate_limit_ms: env_u64("DOMAIN_RATE_LIMIT_MS", 1000),
            max_retries: env_u64("CRAWLER_MAX_RETRIES", 3) as u32,
            retry_backoff_base: env_u64("CRAWLER_RETRY_BACKOFF_BASE", 2),
            chunk_size: env_usize("CRAWLER_CHUNK_SIZE", 1000),
            chunk_overlap: env_usize("CRAWLER_CHUNK_OVERLAP", 200),
            freshness_window_secs: env_u64("FRESHNESS_WINDOW_SECS", 86_400),
            discovery_buffer_size: env_usize("DISCOVERY_BUFFER_SIZE", 1000),
            max_queue_size: env_usize("MAX_QUEUE_SIZE", 10_000),
            claim_ttl_secs: env_u64("CRAWL_CLAIM_TTL_SECS", 120),
            port: env_u64("CRAWLER_PORT", 8012) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_shape() {
        let cfg = RedisConfig {
            host: "redis.internal".into(),
            port: 6380,
        };
        assert_eq!(cfg.url(), "redis://redis.internal:6380/");
    }

    #[test]
    fn defaults_are_sane() {
        let crawler = CrawlerConfig {
            concurrency: 10,
            domain_rate_limit_ms: 1000,
            max_retries: 3,
            retry_backoff_base: 2,
            chunk_size: 1000,
            chunk_overlap: 200,
            freshness_window_secs: 86_400,
            discovery_buffer_size: 1000,
            max_queue_size: 10_000,
            claim_ttl_secs: 120,
            port: 8012,
        };
        assert!(crawler.chunk_overlap < crawler.chunk_size);
    }
}
