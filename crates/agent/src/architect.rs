//! The architect: map-reduce synthesis over gathered texts.
//!
//! Map: every input document is split into overlapping chunks and each chunk
//! runs through the extraction prompt; a chunk that fails is skipped, not
//! fatal. Reduce: the combined context is re-condensed until it fits the
//! synthesis budget, bounded by a maximum number of attempts — past the
//! bound the context is hard-truncated rather than recursing forever.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use inquest_bus::{Address, Agent, AgentContext, Envelope};
use inquest_core::{keys, text, AgentGoal, AgentGoalType, AgentType, Error};
use inquest_llm::{render_prompt, AgentConfigStore};
use inquest_memory::SharedMemory;

use crate::worker::{reply_failed, reply_resolved, Cognition};

const CHUNK_SIZE: usize = 2000;
const CHUNK_OVERLAP: usize = 200;
/// Combined context must fit under this many characters before synthesis.
const CONDENSE_THRESHOLD: usize = 8000;
/// Reduce passes allowed before hard truncation.
const MAX_CONDENSE_ATTEMPTS: usize = 3;

const IMPRESSION: &str = "final_answer";

const NO_CONTEXT_ANSWER: &str = "Insufficient information gathered to form an answer.";

#[derive(Clone)]
pub struct ArchitectAgent {
    cognition: Cognition,
    memory: SharedMemory,
    summarize_prompt: String,
    synthesis_prompt: String,
    condense_threshold: usize,
    max_condense_attempts: usize,
}

impl ArchitectAgent {
    pub fn new(
        cognition: Cognition,
        memory: SharedMemory,
        store: &AgentConfigStore,
    ) -> Result<Self, Error> {
        let summarize_prompt = store
            .prompt(AgentType::Synthesize, "summarize_chunk")
            .ok_or_else(|| Error::Validation("architect prompt 'summarize_chunk' missing".into()))?
            .to_string();
        let synthesis_prompt = store
            .prompt(AgentType::Synthesize, "default")
            .ok_or_else(|| Error::Validation("architect prompt 'default' missing".into()))?
            .to_string();
        Ok(Self {
            cognition,
            memory,
            summarize_prompt,
            synthesis_prompt,
            condense_threshold: CONDENSE_THRESHOLD,
            max_condense_attempts: MAX_CONDENSE_ATTEMPTS,
        })
    }

    /// Map one chunk through the extraction prompt. Failures collapse to an
    /// empty summary — partial context beats an aborted request.
    async fn summarize_chunk(&self, query: &str, chunk: &str) -> String {
        if chunk.is_empty() {
            return String::new();
        }
        let prompt = render_prompt(
            &self.summarize_prompt,
            &[("query", query), ("context", chunk)],
        );
        match self.cognition.think("", &prompt).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "chunk summarization failed, skipping chunk");
                String::new()
            }
        }
    }

    /// One map pass over a body of text: chunk, summarize concurrently,
    /// rejoin.
    async fn condense(&self, query: &str, body: &str) -> String {
        let chunks = text::split_text(body, CHUNK_SIZE, CHUNK_OVERLAP);
        let summaries = join_all(chunks.iter().map(|c| self.summarize_chunk(query, c))).await;
        summaries
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Build the synthesis context from the input documents, reducing until
    /// it fits the budget.
    async fn build_context(&self, query: &str, documents: &[String]) -> String {
        let page_summaries = join_all(documents.iter().map(|d| self.condense(query, d))).await;
        let mut context = page_summaries
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mut attempts = 0;
        while context.chars().count() > self.condense_threshold
            && attempts < self.max_condense_attempts
        {
            attempts += 1;
            info!(attempt = attempts, len = context.len(), "condensing context");
            context = self.condense(query, &context).await;
        }

        if context.chars().count() > self.condense_threshold {
            warn!(len = context.len(), "condense bound exhausted, truncating context");
            context = context.chars().take(self.condense_threshold).collect();
        }
        context
    }

    async fn run(self, ctx: AgentContext, from: Address, goal: AgentGoal) {
        if let Err(e) = self.process(&ctx, &from, &goal).await {
            warn!(request_id = %goal.request_id, error = %e, "synthesis failed");
            let _ = reply_failed(
                &ctx,
                &from,
                &goal,
                format!("synthesis failed: {e}"),
                Default::default(),
            )
            .await;
        }
    }

    async fn process(&self, ctx: &AgentContext, from: &str, goal: &AgentGoal) -> Result<(), Error> {
        let input_keys = keys::parse_key_list(&goal.content);
        if input_keys.is_empty() {
            return Err(Error::Worker("architect received no input keys".into()));
        }

        // Each input impression is a JSON list of texts; a bare string is
        // treated as a single document.
        let mut documents: Vec<String> = Vec::new();
        for key in &input_keys {
            let Some(value) = self.memory.get(key).await else {
                return Err(Error::Validation(format!("missing impression '{key}'")));
            };
            match serde_json::from_str::<Vec<String>>(&value) {
                Ok(texts) => documents.extend(texts.into_iter().filter(|t| !t.is_empty())),
                Err(_) if !value.is_empty() => documents.push(value),
                Err(_) => {}
            }
        }
        info!(request_id = %goal.request_id, documents = documents.len(), "synthesis input loaded");

        let query = self
            .memory
            .get(&keys::query_key(&goal.request_id))
            .await
            .ok_or_else(|| Error::Worker("original query not found".into()))?;

        let answer = if documents.is_empty() {
            NO_CONTEXT_ANSWER.to_string()
        } else {
            let context = self.build_context(&query, &documents).await;
            if context.is_empty() {
                NO_CONTEXT_ANSWER.to_string()
            } else {
                let prompt = render_prompt(
                    &self.synthesis_prompt,
                    &[("query", query.as_str()), ("context", context.as_str())],
                );
                self.cognition.think("", &prompt).await?
            }
        };

        let step_id = goal.metadata.get("step_id").cloned().unwrap_or_default();
        let output_key = keys::impression_key(&goal.request_id, &step_id, IMPRESSION);
        self.memory.set(output_key.clone(), answer).await;

        reply_resolved(
            ctx,
            from,
            goal,
            "Architect task completed.".to_string(),
            vec![output_key],
        )
        .await
    }
}

#[async_trait]
impl Agent for ArchitectAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Synthesize
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
            warn!(request_id = %goal.request_id, "architect received non-TASK goal");
            return Ok(());
        }
        let this = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(this.run(ctx, from, goal));
        Ok(())
    }
}
