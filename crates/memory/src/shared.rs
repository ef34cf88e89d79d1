//! Request-scoped impression store.
//!
//! Bulk work products (HTML bodies, clean text, summaries, answers) live
//! here under `{request_id}:{step_id}:{name}` keys; messages between agents
//! carry only the keys. Lifetime is bounded by request completion — there is
//! no TTL.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use inquest_core::keys;

/// Cheaply clonable handle; all clones see the same map.
#[derive(Clone, Default)]
pub struct SharedMemory {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.write().await.insert(key.into(), value.into());
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn delete(&self, key: &str) {
        self.inner.write().await.remove(key);
    }

    /// Remove every key belonging to a request. With `preserve_query` the
    /// `{request_id}:query` entry survives (for re-planning).
    pub async fn clear_session(&self, request_id: &str, preserve_query: bool) {
        let prefix = keys::session_prefix(request_id);
        let query_key = keys::query_key(request_id);
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|key, _| {
            !key.starts_with(&prefix) || (preserve_query && *key == query_key)
        });
        debug!(
            request_id,
            removed = before - map.len(),
            preserve_query,
            "session cleared"
        );
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
