//! Per-agent-type model resolution.
//!
//! Each worker role maps to a model spec (model name, API kind, sampling
//! settings). The registry merges the agent config store with the global
//! LLM config and hands out providers bound to the right model.

use std::sync::Arc;

use inquest_core::config::LlmConfig;
use inquest_core::AgentType;

use crate::prompts::AgentConfigStore;
use crate::provider::{LlmProvider, OllamaProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiType {
    Chat,
    Embeddings,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub model: String,
    pub api_type: ApiType,
    pub temperature: f32,
    pub num_predict: u32,
}

pub struct ModelRegistry {
    base_url: String,
    default_model: String,
    embedding_model: String,
    store: AgentConfigStore,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig, store: AgentConfigStore) -> Self {
        // The SEMANTICS profile names the embedding model for the whole
        // deployment.
        let embedding_model = store
            .profile(AgentType::Semantics)
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| "nomic-embed-text".to_string());
        Self {
            base_url: config.base_url.clone(),
            default_model: config.default_model.clone(),
            embedding_model,
            store,
        }
    }

    pub fn spec_for(&self, agent: AgentType) -> ModelSpec {
        let profile = self.store.profile(agent);
        ModelSpec {
            model: profile
                .and_then(|p| p.model.clone())
                .unwrap_or_else(|| self.default_model.clone()),
            api_type: match profile.map(|p| p.api_type.as_str()) {
                Some("embeddings") => ApiType::Embeddings,
                _ => ApiType::Chat,
            },
            temperature: profile.and_then(|p| p.temperature).unwrap_or(0.3),
            num_predict: profile.and_then(|p| p.num_predict).unwrap_or(1024),
        }
    }

    /// Provider bound to the agent's model (and the shared embedding model).
    pub fn provider_for(&self, agent: AgentType) -> Arc<dyn LlmProvider> {
        let spec = self.spec_for(agent);
        Arc::new(OllamaProvider::new(
            self.base_url.clone(),
            spec.model,
            self.embedding_model.clone(),
        ))
    }

    pub fn store(&self) -> &AgentConfigStore {
        &self.store
    }
}
