//! Agent type → address registry.
//!
//! No leasing or locking — workers serialize through their own inboxes, so
//! the registry only answers "give me someone of this type". Selection is
//! uniform random over the registered addresses.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use inquest_core::AgentType;

use crate::router::Address;

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<AgentType, Vec<Address>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; registration order is stable.
    pub async fn register(&self, agent_type: AgentType, address: &str) {
        let mut agents = self.agents.write().await;
        let addresses = agents.entry(agent_type).or_default();
        if !addresses.iter().any(|a| a == address) {
            addresses.push(address.to_string());
            debug!(agent_type = %agent_type, address, "agent registered");
        }
    }

    /// One address of the given type, chosen uniformly at random.
    pub async fn get_agent(&self, agent_type: AgentType) -> Option<Address> {
        let agents = self.agents.read().await;
        let chosen = agents
            .get(&agent_type)
            .and_then(|addresses| addresses.choose(&mut rand::thread_rng()))
            .cloned();
        if chosen.is_none() {
            warn!(agent_type = %agent_type, "no agents available");
        }
        chosen
    }

    /// Reverse lookup: which type registered this address.
    pub async fn get_agent_type(&self, address: &str) -> Option<AgentType> {
        let agents = self.agents.read().await;
        for (agent_type, addresses) in agents.iter() {
            if addresses.iter().any(|a| a == address) {
                return Some(*agent_type);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = AgentRegistry::new();
        registry.register(AgentType::Scout, "scout-1").await;
        registry.register(AgentType::Scout, "scout-1").await;
        registry.register(AgentType::Scout, "scout-2").await;

        // Selection always lands on a registered address.
        for _ in 0..10 {
            let addr = registry.get_agent(AgentType::Scout).await.unwrap();
            assert!(addr == "scout-1" || addr == "scout-2");
        }
    }

    #[tokio::test]
    async fn empty_type_returns_none() {
        let registry = AgentRegistry::new();
        assert!(registry.get_agent(AgentType::Compute).await.is_none());
    }

    #[tokio::test]
    async fn reverse_lookup() {
        let registry = AgentRegistry::new();
        registry.register(AgentType::Planner, "planner-1").await;
        assert_eq!(
            registry.get_agent_type("planner-1").await,
            Some(AgentType::Planner)
        );
        assert!(registry.get_agent_type("ghost").await.is_none());
    }
}
