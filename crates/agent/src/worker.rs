//! Shared worker plumbing: the cognition handle (model + sampling settings
//! bound together) and the common reply shapes of the worker contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use inquest_bus::{AgentContext, Envelope};
use inquest_core::{AgentGoal, Error, Thought, ThoughtType};
use inquest_llm::{LlmProvider, Message, ModelSpec};

/// An LLM bound to one agent role's model spec.
#[derive(Clone)]
pub struct Cognition {
    provider: Arc<dyn LlmProvider>,
    spec: ModelSpec,
}

impl Cognition {
    pub fn new(provider: Arc<dyn LlmProvider>, spec: ModelSpec) -> Self {
        Self { provider, spec }
    }

    /// One-shot completion over a combined context + task system message.
    pub async fn think(&self, context: &str, goal: &str) -> Result<String, Error> {
        let system = if context.is_empty() {
            goal.to_string()
        } else {
            format!("CONTEXT:\n{context}\n\nTASK:\n{goal}")
        };
        let reply = self
            .provider
            .complete(
                vec![Message::system(system)],
                self.spec.temperature,
                self.spec.num_predict,
            )
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(reply)
    }

    pub async fn embed(&self, prompt: &str) -> Result<Vec<f32>, Error> {
        self.provider
            .embed(prompt)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        self.provider.clone()
    }
}

/// Metadata every reply echoes back: the goal's metadata plus `goal_type`.
pub fn reply_metadata(goal: &AgentGoal) -> BTreeMap<String, String> {
    let mut metadata = goal.metadata.clone();
    metadata.insert("goal_type".to_string(), goal.goal_type.as_str().to_string());
    metadata
}

/// Send a RESOLVED thought carrying the written impression keys.
pub async fn reply_resolved(
    ctx: &AgentContext,
    to: &str,
    goal: &AgentGoal,
    content: String,
    impressions: Vec<String>,
) -> Result<(), Error> {
    let thought = Thought {
        request_id: goal.request_id.clone(),
        thought_type: ThoughtType::Resolved,
        content,
        impressions,
        metadata: reply_metadata(goal),
    };
    ctx.send(to, Envelope::Thought(thought)).await?;
    Ok(())
}

/// Send a FAILED thought with the reason; extra metadata entries (e.g.
/// `exit_code`) are merged in.
pub async fn reply_failed(
    ctx: &AgentContext,
    to: &str,
    goal: &AgentGoal,
    reason: String,
    extra: BTreeMap<String, String>,
) -> Result<(), Error> {
    let mut metadata = reply_metadata(goal);
    metadata.extend(extra);
    let thought = Thought {
        request_id: goal.request_id.clone(),
        thought_type: ThoughtType::Failed,
        content: reason,
        impressions: vec![],
        metadata,
    };
    ctx.send(to, Envelope::Thought(thought)).await?;
    Ok(())
}

/// Strip a markdown code fence (``` or ```yaml etc.) wrapping a payload.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
