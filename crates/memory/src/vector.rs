//! Chroma HTTP client.
//!
//! Collections are resolved by name (get-or-create) and cached. Embeddings
//! are computed client-side through the SEMANTICS model, so documents and
//! queries both go through the same embedding space. Writes are batched by
//! `CHROMA_BATCH_SIZE`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use inquest_core::config::ChromaConfig;
use inquest_llm::{LlmError, LlmProvider};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} — {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    ParseError(String),
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),
}

impl From<MemoryError> for inquest_core::Error {
    fn from(e: MemoryError) -> Self {
        inquest_core::Error::Transport(e.to_string())
    }
}

/// One stored (or retrieved) document.
#[derive(Debug, Clone)]
pub struct VectorDoc {
    pub id: String,
    pub document: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub distance: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CollectionReply {
    id: String,
}

#[derive(Clone)]
pub struct VectorStore {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
    embedder: Arc<dyn LlmProvider>,
    /// collection name → collection id.
    collections: Arc<RwLock<HashMap<String, String>>>,
}

impl VectorStore {
    pub fn new(config: &ChromaConfig, embedder: Arc<dyn LlmProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            embedder,
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, MemoryError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(MemoryError::ApiError {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Resolve a collection id, creating the collection on first use.
    async fn collection_id(&self, name: &str) -> Result<String, MemoryError> {
        if let Some(id) = self.collections.read().await.get(name) {
            return Ok(id.clone());
        }

        let url = format!("{}/api/v1/collections", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": name, "get_or_create": true }))
            .send()
            .await?;
        let reply: CollectionReply = self.check(response).await?.json().await?;

        self.collections
            .write()
            .await
            .insert(name.to_string(), reply.id.clone());
        debug!(collection = name, id = %reply.id, "collection resolved");
        Ok(reply.id)
    }

    /// Upsert documents (id, text, metadata); embeddings computed here.
    pub async fn upsert(
        &self,
        collection: &str,
        docs: &[(String, String, HashMap<String, serde_json::Value>)],
    ) -> Result<(), MemoryError> {
        if docs.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(collection).await?;
        let url = format!("{}/api/v1/collections/{}/upsert", self.base_url, id);

        for batch in docs.chunks(self.batch_size) {
            let mut ids = Vec::with_capacity(batch.len());
            let mut documents = Vec::with_capacity(batch.len());
            let mut metadatas = Vec::with_capacity(batch.len());
            let mut embeddings = Vec::with_capacity(batch.len());
            for (doc_id, text, metadata) in batch {
                embeddings.push(self.embedder.embed(text).await?);
                ids.push(doc_id.clone());
                documents.push(text.clone());
                metadatas.push(metadata.clone());
            }

            let response = self
                .client
                .post(&url)
                .json(&json!({
                    "ids": ids,
                    "documents": documents,
                    "metadatas": metadatas,
                    "embeddings": embeddings,
                }))
                .send()
                .await?;
            self.check(response).await?;
        }
        Ok(())
    }

    /// Top-k most similar documents to the query text.
    pub async fn query(
        &self,
        collection: &str,
        query_text: &str,
        n_results: usize,
    ) -> Result<Vec<VectorDoc>, MemoryError> {
        let id = self.collection_id(collection).await?;
        let url = format!("{}/api/v1/collections/{}/query", self.base_url, id);
        let embedding = self.embedder.embed(query_text).await?;

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": n_results,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;
        let reply: serde_json::Value = self.check(response).await?.json().await?;

        Ok(normalize_query_reply(&reply))
    }

    pub async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), MemoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(collection).await?;
        let url = format!("{}/api/v1/collections/{}/delete", self.base_url, id);
        let response = self.client.post(&url).json(&json!({ "ids": ids })).send().await?;
        self.check(response).await?;
        Ok(())
    }

    pub async fn get_by_id(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<VectorDoc>, MemoryError> {
        let id = self.collection_id(collection).await?;
        let url = format!("{}/api/v1/collections/{}/get", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "ids": [doc_id], "include": ["documents", "metadatas"] }))
            .send()
            .await?;
        let reply: serde_json::Value = self.check(response).await?.json().await?;
        Ok(normalize_get_reply(&reply).into_iter().next())
    }

    pub async fn count(&self, collection: &str) -> Result<u64, MemoryError> {
        let id = self.collection_id(collection).await?;
        let url = format!("{}/api/v1/collections/{}/count", self.base_url, id);
        let response = self.client.get(&url).send().await?;
        let count: u64 = self.check(response).await?.json().await?;
        Ok(count)
    }

    pub async fn heartbeat(&self) -> bool {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

/// Query replies nest one list per query embedding; we always send one.
fn normalize_query_reply(reply: &serde_json::Value) -> Vec<VectorDoc> {
    let ids = nested_strings(&reply["ids"]);
    let documents = nested_strings(&reply["documents"]);
    let metadatas = reply["metadatas"][0].as_array().cloned().unwrap_or_default();
    let distances = reply["distances"][0].as_array().cloned().unwrap_or_default();

    ids.iter()
        .enumerate()
        .map(|(i, id)| VectorDoc {
            id: id.clone(),
            document: documents.get(i).cloned().unwrap_or_default(),
            metadata: metadatas
                .get(i)
                .and_then(|m| m.as_object())
                .map(|o| o.clone().into_iter().collect())
                .unwrap_or_default(),
            distance: distances.get(i).and_then(|d| d.as_f64()).map(|d| d as f32),
        })
        .collect()
}

/// Get replies are flat lists.
fn normalize_get_reply(reply: &serde_json::Value) -> Vec<VectorDoc> {
    let ids = flat_strings(&reply["ids"]);
    let documents = flat_strings(&reply["documents"]);
    let metadatas = reply["metadatas"].as_array().cloned().unwrap_or_default();

    ids.iter()
        .enumerate()
        .map(|(i, id)| VectorDoc {
            id: id.clone(),
            document: documents.get(i).cloned().unwrap_or_default(),
            metadata: metadatas
                .get(i)
                .and_then(|m| m.as_object())
                .map(|o| o.clone().into_iter().collect())
                .unwrap_or_default(),
            distance: None,
        })
        .collect()
}

fn nested_strings(value: &serde_json::Value) -> Vec<String> {
    value[0]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn flat_strings(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_reply_normalization() {
        let reply = json!({
            "ids": [["a", "b"]],
            "documents": [["doc a", "doc b"]],
            "metadatas": [[{"source": "u1"}, {"source": "u2"}]],
            "distances": [[0.1, 0.4]],
        });
        let docs = normalize_query_reply(&reply);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a");
        assert_eq!(docs[0].document, "doc a");
        assert_eq!(docs[0].metadata["source"], json!("u1"));
        assert_eq!(docs[1].distance, Some(0.4));
    }

    #[test]
    fn empty_query_reply_is_empty() {
        assert!(normalize_query_reply(&json!({})).is_empty());
    }

    #[test]
    fn get_reply_normalization() {
        let reply = json!({
            "ids": ["x"],
            "documents": ["doc x"],
            "metadatas": [{"chunk_index": 0}],
        });
        let docs = normalize_get_reply(&reply);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].document, "doc x");
        assert!(docs[0].distance.is_none());
    }
}
