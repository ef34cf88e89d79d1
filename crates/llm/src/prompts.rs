//! Agent configuration store: per-role model settings, prompt templates,
//! and fixed plan schemas.
//!
//! The store is external configuration — a single YAML document mapping
//! agent type to profile. Defaults are embedded at compile time; operators
//! override with `AGENT_CONFIG_PATH`.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::info;

use inquest_core::AgentType;

/// Built-in profile document, used when no override path is configured.
const DEFAULT_AGENTS_YAML: &str = include_str!("../assets/agents.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub model: Option<String>,
    /// "chat" or "embeddings".
    #[serde(default = "default_api_type")]
    pub api_type: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub num_predict: Option<u32>,
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub schemas: HashMap<String, serde_yaml::Value>,
}

fn default_api_type() -> String {
    "chat".to_string()
}

#[derive(Debug, Clone)]
pub struct AgentConfigStore {
    profiles: HashMap<String, AgentProfile>,
}

impl AgentConfigStore {
    /// Load from `AGENT_CONFIG_PATH` when set, otherwise the embedded
    /// defaults.
    pub fn load() -> Result<Self, serde_yaml::Error> {
        match std::env::var("AGENT_CONFIG_PATH").ok().filter(|p| !p.is_empty()) {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(content) => {
                    info!(path, "loading agent config");
                    Self::from_yaml(&content)
                }
                Err(e) => {
                    tracing::warn!(path, error = %e, "agent config unreadable, using defaults");
                    Self::from_yaml(DEFAULT_AGENTS_YAML)
                }
            },
            None => Self::from_yaml(DEFAULT_AGENTS_YAML),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let profiles: HashMap<String, AgentProfile> = serde_yaml::from_str(content)?;
        Ok(Self { profiles })
    }

    pub fn profile(&self, agent: AgentType) -> Option<&AgentProfile> {
        self.profiles.get(agent.as_str())
    }

    pub fn prompt(&self, agent: AgentType, name: &str) -> Option<&str> {
        self.profile(agent)
            .and_then(|p| p.prompts.get(name))
            .map(|s| s.as_str())
    }

    pub fn schema(&self, agent: AgentType, name: &str) -> Option<&serde_yaml::Value> {
        self.profile(agent).and_then(|p| p.schemas.get(name))
    }
}

/// Substitute `{name}` placeholders in a template.
pub fn render_prompt(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{name}}}"), value);
    }
    rendered
}
