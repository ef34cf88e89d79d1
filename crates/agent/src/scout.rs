//! The scout: web search → deep render → clean text.
//!
//! Stateless, so every goal runs in its own detached task and the inbox
//! never backs up behind a slow render. Pages that render to an empty body
//! are dropped; the output is a JSON list of clean text bodies.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use inquest_bus::{Address, Agent, AgentContext, Envelope};
use inquest_core::render::RenderClient;
use inquest_core::{keys, text, AgentGoal, AgentGoalType, AgentType, Error};
use inquest_llm::{render_prompt, AgentConfigStore};
use inquest_memory::SharedMemory;

use crate::search::WebSearch;
use crate::worker::{reply_failed, reply_resolved, Cognition};

/// How many search results to chase per query.
const SEARCH_DEPTH: usize = 3;

const IMPRESSION: &str = "clean_text_bodies";

#[derive(Clone)]
pub struct ScoutAgent {
    cognition: Cognition,
    memory: SharedMemory,
    renderer: RenderClient,
    search: Arc<dyn WebSearch>,
    rewrite_prompt: Option<String>,
}

impl ScoutAgent {
    pub fn new(
        cognition: Cognition,
        memory: SharedMemory,
        renderer: RenderClient,
        search: Arc<dyn WebSearch>,
        store: &AgentConfigStore,
    ) -> Self {
        Self {
            cognition,
            memory,
            renderer,
            search,
            rewrite_prompt: store
                .prompt(AgentType::Scout, "rewrite")
                .map(str::to_string),
        }
    }

    /// Ask the LLM for a search-engine phrasing; keep the original question
    /// when the model is unavailable.
    async fn rewrite_query(&self, query: &str) -> String {
        let Some(template) = &self.rewrite_prompt else {
            return query.to_string();
        };
        let prompt = render_prompt(template, &[("query", query)]);
        match self.cognition.think("", &prompt).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                rewritten.lines().next().unwrap_or(query).trim().to_string()
            }
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(error = %e, "query rewrite unavailable");
                query.to_string()
            }
        }
    }

    async fn run(self, ctx: AgentContext, from: Address, goal: AgentGoal) {
        let result = self.process(&ctx, &from, &goal).await;
        if let Err(e) = result {
            warn!(request_id = %goal.request_id, error = %e, "scout failed");
            let _ = reply_failed(
                &ctx,
                &from,
                &goal,
                format!("scout failed: {e}"),
                Default::default(),
            )
            .await;
        }
    }

    async fn process(
        &self,
        ctx: &AgentContext,
        from: &str,
        goal: &AgentGoal,
    ) -> Result<(), Error> {
        let query = self
            .memory
            .get(&keys::query_key(&goal.request_id))
            .await
            .ok_or_else(|| Error::Worker("scout received empty search query".into()))?;

        let search_query = self.rewrite_query(&query).await;
        let urls = self.search.search(&search_query, SEARCH_DEPTH).await?;
        info!(request_id = %goal.request_id, query = %search_query, urls = urls.len(), "scout searching");

        let renders = join_all(urls.iter().map(|url| self.renderer.render(url))).await;
        let bodies: Vec<String> = renders
            .into_iter()
            .filter(|r| !r.is_empty())
            .map(|r| text::extract_text(&r.body))
            .filter(|t| !t.is_empty())
            .collect();

        let step_id = goal.metadata.get("step_id").cloned().unwrap_or_default();
        let output_key = keys::impression_key(&goal.request_id, &step_id, IMPRESSION);
        self.memory
            .set(output_key.clone(), serde_json::to_string(&bodies).unwrap_or_default())
            .await;

        reply_resolved(
            ctx,
            from,
            goal,
            format!(
                "Scout task completed. Extracted {} clean bodies from {} sources.",
                bodies.len(),
                urls.len()
            ),
            vec![output_key],
        )
        .await
    }
}

#[async_trait]
impl Agent for ScoutAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Scout
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
            warn!(request_id = %goal.request_id, "scout received non-TASK goal");
            return Ok(());
        }
        let this = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(this.run(ctx, from, goal));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::mock_cognition;
    use axum::routing::post;
    use axum::{Json, Router as AxumRouter};
    use inquest_bus::Router;
    use inquest_core::config::RendererConfig;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    struct FixedSearch {
        urls: Vec<String>,
    }

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(&self, _query: &str, max: usize) -> Result<Vec<String>, Error> {
            Ok(self.urls.iter().take(max).cloned().collect())
        }
    }

    /// Mock renderer: URLs containing "empty" render to an empty body.
    async fn spawn_mock_renderer() -> String {
        async fn render(Json(request): Json<Value>) -> Json<Value> {
            let url = request["url"].as_str().unwrap_or_default().to_string();
            let body = if url.contains("empty") {
                String::new()
            } else {
                format!("<html><body><p>Content of {url}</p></body></html>")
            };
            Json(json!({ "url": url, "body": body, "hrefs": [] }))
        }

        let app = AxumRouter::new().route("/render", post(render));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/render")
    }

    #[tokio::test]
    async fn empty_bodies_are_dropped() {
        let endpoint = spawn_mock_renderer().await;
        let memory = SharedMemory::new();
        memory.set("r1:query", "foo").await;

        let scout = ScoutAgent {
            cognition: mock_cognition(vec![Ok("foo search".into())]),
            memory: memory.clone(),
            renderer: RenderClient::new(&RendererConfig {
                url: endpoint,
                timeout_ms: 2000,
            }),
            search: Arc::new(FixedSearch {
                urls: vec![
                    "https://one.example/".into(),
                    "https://two.example/empty".into(),
                    "https://three.example/".into(),
                ],
            }),
            rewrite_prompt: Some("rewrite {query}".into()),
        };

        let router = Router::new();
        let mut caller_rx = router.attach("caller").await;
        let ctx = AgentContext::new("scout-1", router.clone());

        let mut metadata = BTreeMap::new();
        metadata.insert("node_id".into(), "look".into());
        metadata.insert("step_id".into(), "2".into());
        let goal = AgentGoal {
            request_id: "r1".into(),
            goal_type: AgentGoalType::Task,
            content: "[]".into(),
            metadata,
        };

        scout.process(&ctx, "caller", &goal).await.unwrap();

        let delivery = caller_rx.recv().await.unwrap();
        let Envelope::Thought(thought) = delivery.envelope else {
            panic!("expected thought");
        };
        assert_eq!(thought.impressions, vec!["r1:2:clean_text_bodies".to_string()]);
        assert_eq!(thought.metadata.get("node_id").unwrap(), "look");
        assert_eq!(thought.metadata.get("goal_type").unwrap(), "task");

        let stored = memory.get("r1:2:clean_text_bodies").await.unwrap();
        let bodies: Vec<String> = serde_json::from_str(&stored).unwrap();
        assert_eq!(bodies.len(), 2, "the empty body should be dropped");
        assert!(bodies[0].contains("one.example"));
        assert!(bodies[1].contains("three.example"));
    }

    #[tokio::test]
    async fn missing_query_fails_the_goal() {
        let endpoint = spawn_mock_renderer().await;
        let scout = ScoutAgent {
            cognition: mock_cognition(vec![]),
            memory: SharedMemory::new(),
            renderer: RenderClient::new(&RendererConfig {
                url: endpoint,
                timeout_ms: 2000,
            }),
            search: Arc::new(FixedSearch { urls: vec![] }),
            rewrite_prompt: None,
        };

        let router = Router::new();
        let mut caller_rx = router.attach("caller").await;
        let ctx = AgentContext::new("scout-1", router.clone());

        let goal = AgentGoal {
            request_id: "r2".into(),
            goal_type: AgentGoalType::Task,
            content: "[]".into(),
            metadata: Default::default(),
        };
        scout.clone().run(ctx, "caller".into(), goal).await;

        let delivery = caller_rx.recv().await.unwrap();
        let Envelope::Thought(thought) = delivery.envelope else {
            panic!("expected thought");
        };
        assert_eq!(thought.thought_type, inquest_core::ThoughtType::Failed);
        assert!(thought.content.contains("empty search query"));
    }
}
