//! The gateway: user-facing intake and response formatting (SPEAKER role).
//!
//! Intake: user queries arrive from the HTTP front door, get remembered for
//! later formatting, and are forwarded to the conductor. Egress: terminal
//! responses (or failures) are rewritten through the speaker prompts into
//! plain markdown and posted to the chat server. Output that looks like
//! JSON or a fenced block is rejected once and retried with a stricter
//! instruction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use inquest_bus::{Address, Agent, AgentContext, Envelope, CONDUCTOR_ADDRESS};
use inquest_core::{AgentType, Error, Response, Thought, ThoughtType, UserQuery};
use inquest_llm::{render_prompt, AgentConfigStore};

use crate::worker::Cognition;

const FALLBACK_QUERY: &str = "your question";
const FALLBACK_ANSWER: &str =
    "I apologize, but I am having trouble formatting the answer correctly. Please try again.";

#[derive(Clone)]
pub struct GatewayAgent {
    cognition: Cognition,
    speaker_prompt: String,
    failure_prompt: String,
    chat_server_url: String,
    client: reqwest::Client,
    /// request_id → original query, kept until the response ships.
    queries: Arc<Mutex<HashMap<String, String>>>,
}

impl GatewayAgent {
    pub fn new(
        cognition: Cognition,
        store: &AgentConfigStore,
        chat_server_url: String,
    ) -> Result<Self, Error> {
        let speaker_prompt = store
            .prompt(AgentType::Speaker, "speaker")
            .ok_or_else(|| Error::Validation("speaker prompt 'speaker' missing".into()))?
            .to_string();
        let failure_prompt = store
            .prompt(AgentType::Speaker, "failure")
            .ok_or_else(|| Error::Validation("speaker prompt 'failure' missing".into()))?
            .to_string();
        Ok(Self {
            cognition,
            speaker_prompt,
            failure_prompt,
            chat_server_url,
            client: reqwest::Client::new(),
            queries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn remember_query(&self, request_id: &str, query: &str) {
        self.queries
            .lock()
            .await
            .insert(request_id.to_string(), query.to_string());
    }

    async fn take_query(&self, request_id: &str) -> String {
        self.queries
            .lock()
            .await
            .remove(request_id)
            .unwrap_or_else(|| FALLBACK_QUERY.to_string())
    }

    /// Produce user-facing markdown, retrying once when the model slips
    /// into JSON or a code fence.
    async fn format_markdown(&self, prompt: &str) -> String {
        let first = match self.cognition.think("", prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "speaker model unavailable");
                return FALLBACK_ANSWER.to_string();
            }
        };
        if !looks_malformed(&first) {
            return first;
        }

        warn!("speaker produced malformed output, retrying with strict instruction");
        let retry_prompt = format!(
            "{prompt}\n\nSYSTEM ALERT: PREVIOUS OUTPUT WAS REJECTED. DO NOT USE CODE FENCES. \
             DO NOT OUTPUT JSON. RETURN ONLY RAW MARKDOWN."
        );
        match self.cognition.think("", &retry_prompt).await {
            Ok(text) if !looks_malformed(&text) => text,
            _ => {
                error!("speaker failed to produce valid markdown after retry");
                FALLBACK_ANSWER.to_string()
            }
        }
    }

    async fn deliver(&self, request_id: &str, text: String, kind: i32) {
        info!(request_id, url = %self.chat_server_url, "posting result to chat server");
        let payload = json!({
            "text": text,
            "request_id": request_id,
            "type": kind,
        });
        if let Err(e) = self.client.post(&self.chat_server_url).json(&payload).send().await {
            error!(request_id, error = %e, "failed to reach chat server");
        }
    }

    async fn handle_final_response(&self, response: Response) {
        let query = self.take_query(&response.request_id).await;
        let prompt = render_prompt(
            &self.speaker_prompt,
            &[("query", query.as_str()), ("data", response.content.as_str())],
        );
        let text = self.format_markdown(&prompt).await;
        self.deliver(&response.request_id, text, Response::FINAL).await;
    }

    async fn handle_failure(&self, thought: Thought) {
        let query = self.take_query(&thought.request_id).await;
        let prompt = render_prompt(&self.failure_prompt, &[("query", query.as_str())]);
        let text = self.format_markdown(&prompt).await;
        self.deliver(&thought.request_id, text, Response::FINAL).await;
    }
}

/// Raw markdown must not open with a fence, an object, or an array.
fn looks_malformed(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with('{') || trimmed.starts_with('[')
}

#[async_trait]
impl Agent for GatewayAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Speaker
    }

    async fn handle(
        &self,
        ctx: &AgentContext,
        from: Address,
        envelope: Envelope,
    ) -> Result<(), Error> {
        match envelope {
            Envelope::Query(query) => {
                self.remember_query(&query.request_id, &query.text).await;
                ctx.send(CONDUCTOR_ADDRESS, Envelope::Query(query)).await?;
                Ok(())
            }
            Envelope::Response(response) if response.is_final() => {
                self.handle_final_response(response).await;
                Ok(())
            }
            Envelope::Response(response) => {
                // Heartbeats and chunk responses pass straight through.
                self.deliver(&response.request_id.clone(), response.content, response.kind)
                    .await;
                Ok(())
            }
            Envelope::Thought(thought) if thought.thought_type == ThoughtType::Failed => {
                self.handle_failure(thought).await;
                Ok(())
            }
            other => {
                warn!(from, kind = other.kind(), "gateway ignoring envelope");
                Ok(())
            }
        }
    }
}

/// Convenience for the HTTP front door: wrap a submitted query and push it
/// into the gateway's inbox.
pub fn intake_envelope(text: String, request_id: String) -> Envelope {
    Envelope::Query(UserQuery::with_request_id(text, request_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::mock_cognition;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router as AxumRouter};
    use serde_json::Value;

    fn gateway(replies: Vec<Result<String, String>>, chat_url: String) -> GatewayAgent {
        GatewayAgent {
            cognition: mock_cognition(replies),
            speaker_prompt: "say {data} for {query}".into(),
            failure_prompt: "apologize for {query}".into(),
            chat_server_url: chat_url,
            client: reqwest::Client::new(),
            queries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    type Posts = Arc<Mutex<Vec<Value>>>;

    async fn spawn_mock_chat_server() -> (String, Posts) {
        let posts: Posts = Arc::new(Mutex::new(Vec::new()));

        async fn result(State(posts): State<Posts>, Json(body): Json<Value>) -> Json<Value> {
            posts.lock().await.push(body);
            Json(json!({ "status": "delivered" }))
        }

        let app = AxumRouter::new()
            .route("/api/result", post(result))
            .with_state(posts.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api/result"), posts)
    }

    #[test]
    fn malformed_detection() {
        assert!(looks_malformed("```md\nhi\n```"));
        assert!(looks_malformed("{\"answer\": 4}"));
        assert!(looks_malformed("  [1, 2]"));
        assert!(!looks_malformed("# Answer\nFour."));
    }

    #[tokio::test]
    async fn final_response_is_formatted_and_posted() {
        let (url, posts) = spawn_mock_chat_server().await;
        let agent = gateway(vec![Ok("**Four.**".into())], url);
        agent.remember_query("r1", "what is 2+2?").await;

        agent
            .handle_final_response(Response {
                request_id: "r1".into(),
                content: "4".into(),
                kind: Response::FINAL,
            })
            .await;

        let posts = posts.lock().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["text"], "**Four.**");
        assert_eq!(posts[0]["request_id"], "r1");
        assert_eq!(posts[0]["type"], -1);
    }

    #[tokio::test]
    async fn malformed_output_retries_once_then_falls_back() {
        let (url, posts) = spawn_mock_chat_server().await;
        // Both attempts malformed → canned apology.
        let agent = gateway(
            vec![Ok("```json\n{}\n```".into()), Ok("{\"still\": \"json\"}".into())],
            url,
        );
        agent.remember_query("r2", "q").await;

        agent
            .handle_final_response(Response {
                request_id: "r2".into(),
                content: "data".into(),
                kind: Response::FINAL,
            })
            .await;

        let posts = posts.lock().await;
        assert_eq!(posts[0]["text"], FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn retry_recovers_clean_markdown() {
        let (url, posts) = spawn_mock_chat_server().await;
        let agent = gateway(vec![Ok("{\"no\"}".into()), Ok("Clean answer.".into())], url);
        agent.remember_query("r3", "q").await;

        agent
            .handle_final_response(Response {
                request_id: "r3".into(),
                content: "data".into(),
                kind: Response::FINAL,
            })
            .await;

        let posts = posts.lock().await;
        assert_eq!(posts[0]["text"], "Clean answer.");
    }

    #[tokio::test]
    async fn failure_uses_failure_prompt() {
        let (url, posts) = spawn_mock_chat_server().await;
        // Echoing mock returns the prompt itself; the failure prompt shape
        // should show through.
        let agent = gateway(Vec::new(), url);
        agent.remember_query("r4", "hard question").await;

        agent
            .handle_failure(Thought {
                request_id: "r4".into(),
                thought_type: ThoughtType::Failed,
                content: "worker exploded".into(),
                impressions: vec![],
                metadata: Default::default(),
            })
            .await;

        let posts = posts.lock().await;
        let text = posts[0]["text"].as_str().unwrap();
        assert!(text.contains("apologize for hard question"));
    }

    #[tokio::test]
    async fn unknown_request_uses_fallback_query() {
        let (url, posts) = spawn_mock_chat_server().await;
        let agent = gateway(Vec::new(), url);

        agent
            .handle_failure(Thought {
                request_id: "ghost".into(),
                thought_type: ThoughtType::Failed,
                content: String::new(),
                impressions: vec![],
                metadata: Default::default(),
            })
            .await;

        let posts = posts.lock().await;
        assert!(posts[0]["text"].as_str().unwrap().contains(FALLBACK_QUERY));
    }
}
