//! Vector retrieval worker: optimize the query, pull top-k documents from
//! the shared collection, hand the texts downstream as JSON.

use async_trait::async_trait;
use tracing::{info, warn};

use inquest_bus::{Address, Agent, AgentContext, Envelope};
use inquest_core::{keys, AgentGoal, AgentGoalType, AgentType, Error};
use inquest_llm::{render_prompt, AgentConfigStore};
use inquest_memory::{SharedMemory, VectorStore};

use crate::worker::{reply_failed, reply_resolved, Cognition};

/// Top-k for similarity lookups.
const RETRIEVE_COUNT: usize = 5;

const IMPRESSION: &str = "retrieved_context";

#[derive(Clone)]
pub struct RetrieveAgent {
    cognition: Cognition,
    memory: SharedMemory,
    store: VectorStore,
    collection: String,
    optimizer_prompt: Option<String>,
}

impl RetrieveAgent {
    pub fn new(
        cognition: Cognition,
        memory: SharedMemory,
        store: VectorStore,
        collection: String,
        config_store: &AgentConfigStore,
    ) -> Self {
        Self {
            cognition,
            memory,
            store,
            collection,
            optimizer_prompt: config_store
                .prompt(AgentType::Retrieve, "optimizer")
                .map(str::to_string),
        }
    }

    async fn optimize_query(&self, query: &str) -> String {
        let Some(template) = &self.optimizer_prompt else {
            return query.to_string();
        };
        let prompt = render_prompt(template, &[("query", query)]);
        match self.cognition.think("", &prompt).await {
            Ok(optimized) if !optimized.trim().is_empty() => optimized.trim().to_string(),
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(error = %e, "query optimizer unavailable");
                query.to_string()
            }
        }
    }

    async fn run(self, ctx: AgentContext, from: Address, goal: AgentGoal) {
        if let Err(e) = self.process(&ctx, &from, &goal).await {
            warn!(request_id = %goal.request_id, error = %e, "retrieve failed");
            let _ = reply_failed(
                &ctx,
                &from,
                &goal,
                format!("retrieve failed: {e}"),
                Default::default(),
            )
            .await;
        }
    }

    async fn process(&self, ctx: &AgentContext, from: &str, goal: &AgentGoal) -> Result<(), Error> {
        let query = match self.memory.get(&keys::query_key(&goal.request_id)).await {
            Some(q) => q,
            None if !goal.content.is_empty() => goal.content.clone(),
            None => return Err(Error::Worker("retrieve received empty query".into())),
        };

        let optimized = self.optimize_query(&query).await;
        info!(request_id = %goal.request_id, original = %query, optimized = %optimized, "retrieving");

        let results = self
            .store
            .query(&self.collection, &optimized, RETRIEVE_COUNT)
            .await
            .map_err(Error::from)?;
        let texts: Vec<String> = results
            .into_iter()
            .map(|doc| doc.document)
            .filter(|d| !d.is_empty())
            .collect();
        info!(request_id = %goal.request_id, count = texts.len(), "documents retrieved");

        let step_id = goal.metadata.get("step_id").cloned().unwrap_or_default();
        let output_key = keys::impression_key(&goal.request_id, &step_id, IMPRESSION);
        self.memory
            .set(output_key.clone(), serde_json::to_string(&texts).unwrap_or_default())
            .await;

        reply_resolved(
            ctx,
            from,
            goal,
            format!("Retrieve task completed. Found {} relevant documents.", texts.len()),
            vec![output_key],
        )
        .await
    }
}

#[async_trait]
impl Agent for RetrieveAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Retrieve
    }

    async fn handle(
        &self,
        ctx: &AgentContext,
        from: Address,
        envelope: Envelope,
    ) -> Result<(), Error> {
        let Envelope::Goal(goal) = envelope else {
            return Ok(());
        };
        if goal.goal_type != AgentGoalType::Task {
            return Ok(());
        }
        let this = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(this.run(ctx, from, goal));
        Ok(())
    }
}
