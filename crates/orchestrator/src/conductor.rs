//! The conductor: a pure message router.
//!
//! User queries become PLAN goals; plan thoughts start graphs; resolved
//! thoughts advance graphs; failed thoughts abort them; replan requests
//! re-issue the PLAN goal against the preserved query. Registrations mutate
//! the registry. No other state lives here.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use inquest_bus::{Address, Agent, AgentContext, AgentRegistry, Envelope};
use inquest_core::{
    keys, AgentGoal, AgentGoalType, AgentType, Error, Thought, ThoughtType, UserQuery,
};
use inquest_memory::SharedMemory;

use crate::orchestrator::Orchestrator;

pub struct Conductor {
    registry: AgentRegistry,
    memory: SharedMemory,
    orchestrator: Arc<Orchestrator>,
}

impl Conductor {
    pub fn new(registry: AgentRegistry, memory: SharedMemory, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            registry,
            memory,
            orchestrator,
        }
    }

    /// Store the raw query and ask a planner for a workflow.
    async fn handle_user_query(&self, ctx: &AgentContext, query: UserQuery) -> Result<(), Error> {
        info!(request_id = %query.request_id, "user query received");
        self.memory
            .set(keys::query_key(&query.request_id), query.text.clone())
            .await;
        self.send_plan_goal(ctx, &query.request_id, &query.text).await
    }

    async fn send_plan_goal(
        &self,
        ctx: &AgentContext,
        request_id: &str,
        query_text: &str,
    ) -> Result<(), Error> {
        let Some(planner) = self.registry.get_agent(AgentType::Planner).await else {
            warn!(request_id, "no planner registered");
            return self
                .orchestrator
                .handle_failure(ctx, request_id, "no planner available")
                .await;
        };
        let goal = AgentGoal {
            request_id: request_id.to_string(),
            goal_type: AgentGoalType::Plan,
            content: query_text.to_string(),
            metadata: Default::default(),
        };
        ctx.send(&planner, Envelope::Goal(goal)).await?;
        Ok(())
    }

    async fn handle_thought(
        &self,
        ctx: &AgentContext,
        from: &str,
        thought: Thought,
    ) -> Result<(), Error> {
        match thought.thought_type {
            ThoughtType::Resolved => {
                let goal_type = thought.metadata.get("goal_type").map(String::as_str);
                if goal_type == Some(AgentGoalType::Plan.as_str()) {
                    self.orchestrator
                        .start_graph(ctx, &thought.request_id, &thought.content)
                        .await
                } else {
                    let Some(node_id) = thought.metadata.get("node_id").cloned() else {
                        warn!(
                            request_id = %thought.request_id,
                            from,
                            "resolved thought without node_id"
                        );
                        return Ok(());
                    };
                    self.orchestrator
                        .handle_step_completion(
                            ctx,
                            &thought.request_id,
                            &node_id,
                            thought.impressions,
                        )
                        .await
                }
            }
            ThoughtType::Failed => {
                self.orchestrator
                    .handle_failure(ctx, &thought.request_id, &thought.content)
                    .await
            }
            other => {
                warn!(request_id = %thought.request_id, ?other, "unroutable thought type");
                Ok(())
            }
        }
    }

    /// Re-plans share the request id; the query survived cleanup.
    async fn handle_replan(
        &self,
        ctx: &AgentContext,
        request_id: &str,
        reason: &str,
    ) -> Result<(), Error> {
        warn!(request_id, reason, "replanning");
        let Some(query_text) = self.memory.get(&keys::query_key(request_id)).await else {
            warn!(request_id, "replan requested but query is gone");
            return Ok(());
        };
        self.send_plan_goal(ctx, request_id, &query_text).await
    }
}

#[async_trait]
impl Agent for Conductor {
    fn agent_type(&self) -> AgentType {
        AgentType::Conductor
    }

    async fn handle(
        &self,
        ctx: &AgentContext,
        from: Address,
        envelope: Envelope,
    ) -> Result<(), Error> {
        match envelope {
            Envelope::Registration(registration) => {
                self.registry.register(registration.agent_type, &from).await;
                Ok(())
            }
            Envelope::Query(query) => self.handle_user_query(ctx, query).await,
            Envelope::Thought(thought) => self.handle_thought(ctx, &from, thought).await,
            Envelope::Replan(replan) => {
                self.handle_replan(ctx, &replan.request_id, &replan.reason).await
            }
            other => {
                warn!(from, kind = other.kind(), "conductor ignoring envelope");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inquest_bus::{spawn_agent, Router, CONDUCTOR_ADDRESS};
    use inquest_core::Response;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Worker double: replies RESOLVED with one impression per goal, after
    /// writing it into shared memory.
    struct ScriptedWorker {
        agent_type: AgentType,
        memory: SharedMemory,
        output: String,
    }

    #[async_trait]
    impl Agent for ScriptedWorker {
        fn agent_type(&self) -> AgentType {
            self.agent_type
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
            let step_id = goal.metadata.get("step_id").cloned().unwrap_or_default();
            let key = keys::impression_key(&goal.request_id, &step_id, "out");
            self.memory.set(key.clone(), self.output.clone()).await;

            let mut metadata = goal.metadata.clone();
            metadata.insert("goal_type".into(), goal.goal_type.as_str().into());
            ctx.send(
                &from,
                Envelope::Thought(Thought {
                    request_id: goal.request_id,
                    thought_type: ThoughtType::Resolved,
                    content: String::new(),
                    impressions: vec![key],
                    metadata,
                }),
            )
            .await?;
            Ok(())
        }
    }

    /// Planner double: always replies with a fixed plan.
    struct ScriptedPlanner {
        plan: String,
    }

    #[async_trait]
    impl Agent for ScriptedPlanner {
        fn agent_type(&self) -> AgentType {
            AgentType::Planner
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
            let mut metadata = BTreeMap::new();
            metadata.insert("goal_type".into(), goal.goal_type.as_str().into());
            ctx.send(
                &from,
                Envelope::Thought(Thought {
                    request_id: goal.request_id,
                    thought_type: ThoughtType::Resolved,
                    content: self.plan.clone(),
                    impressions: vec![],
                    metadata,
                }),
            )
            .await?;
            Ok(())
        }
    }

    struct Bureau {
        router: Router,
        memory: SharedMemory,
        shutdown: Arc<Notify>,
    }

    async fn bureau(plan: &str) -> Bureau {
        let router = Router::new();
        let memory = SharedMemory::new();
        let registry = AgentRegistry::new();
        let shutdown = Arc::new(Notify::new());

        let orchestrator = Arc::new(Orchestrator::new(registry.clone(), memory.clone()));
        let conductor = Arc::new(Conductor::new(registry.clone(), memory.clone(), orchestrator));
        spawn_agent(conductor, router.clone(), CONDUCTOR_ADDRESS, shutdown.clone()).await;

        spawn_agent(
            Arc::new(ScriptedPlanner { plan: plan.to_string() }),
            router.clone(),
            "planner-1",
            shutdown.clone(),
        )
        .await;

        for (agent_type, address, output) in [
            (AgentType::Retrieve, "retrieve-1", "retrieved"),
            (AgentType::Scout, "scout-1", "scouted"),
            (AgentType::Synthesize, "synthesize-1", "the answer"),
            (AgentType::Compute, "compute-1", "4\n"),
        ] {
            spawn_agent(
                Arc::new(ScriptedWorker {
                    agent_type,
                    memory: memory.clone(),
                    output: output.to_string(),
                }),
                router.clone(),
                address,
                shutdown.clone(),
            )
            .await;
        }

        Bureau {
            router,
            memory,
            shutdown,
        }
    }

    async fn recv_final(
        rx: &mut tokio::sync::mpsc::Receiver<inquest_bus::Delivery>,
    ) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for gateway delivery")
            .expect("router closed")
            .envelope
    }

    const DIAMOND_PLAN: &str = r#"
graph:
  nodes:
    - id: fetch
      type: retrieve
    - id: look
      type: scout
    - id: answer
      type: synthesize
  edges:
    - from: fetch
      to: answer
    - from: look
      to: answer
  entry_nodes: [fetch, look]
  terminal_node: answer
"#;

    #[tokio::test]
    async fn full_request_flows_to_final_response() {
        let b = bureau(DIAMOND_PLAN).await;
        // The gateway double just collects deliveries.
        let mut gateway_rx = b.router.attach("gateway-1").await;
        b.router
            .send(
                "gateway-1",
                CONDUCTOR_ADDRESS,
                Envelope::Registration(inquest_core::AgentRegistration {
                    agent_type: AgentType::Speaker,
                }),
            )
            .await
            .unwrap();

        b.router
            .send(
                "gateway-1",
                CONDUCTOR_ADDRESS,
                Envelope::Query(UserQuery::with_request_id("what?", "req-1")),
            )
            .await
            .unwrap();

        match recv_final(&mut gateway_rx).await {
            Envelope::Response(Response { request_id, content, kind }) => {
                assert_eq!(request_id, "req-1");
                assert_eq!(content, "the answer");
                assert_eq!(kind, Response::FINAL);
            }
            other => panic!("expected response, got {}", other.kind()),
        }

        // Session fully cleared, query key included.
        assert!(b.memory.get("req-1:query").await.is_none());
        assert_eq!(b.memory.len().await, 0);

        b.shutdown.notify_waiters();
    }

    #[tokio::test]
    async fn cyclic_plan_triggers_replan_and_preserves_query() {
        let cyclic = r#"
graph:
  nodes:
    - id: seed
      type: retrieve
    - id: a
      type: scout
    - id: b
      type: synthesize
  edges:
    - from: a
      to: b
    - from: b
      to: a
  entry_nodes: [seed]
  terminal_node: seed
"#;
        let b = bureau(cyclic).await;
        let mut probe_rx = b.router.attach("probe").await;

        b.router
            .send(
                "probe",
                CONDUCTOR_ADDRESS,
                Envelope::Query(UserQuery::with_request_id("loop?", "req-2")),
            )
            .await
            .unwrap();

        // The conductor re-issues PLAN goals forever against the scripted
        // cyclic planner; give it a moment and verify the query survived.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(b.memory.get("req-2:query").await.as_deref(), Some("loop?"));

        // No terminal response ever reaches a gateway; nothing else leaked
        // into the probe inbox either.
        assert!(probe_rx.try_recv().is_err());

        b.shutdown.notify_waiters();
    }

    #[tokio::test]
    async fn independent_requests_share_nothing() {
        let b = bureau(DIAMOND_PLAN).await;
        let mut gateway_rx = b.router.attach("gateway-1").await;
        b.router
            .send(
                "gateway-1",
                CONDUCTOR_ADDRESS,
                Envelope::Registration(inquest_core::AgentRegistration {
                    agent_type: AgentType::Speaker,
                }),
            )
            .await
            .unwrap();

        for rid in ["req-a", "req-b"] {
            b.router
                .send(
                    "gateway-1",
                    CONDUCTOR_ADDRESS,
                    Envelope::Query(UserQuery::with_request_id("same text", rid)),
                )
                .await
                .unwrap();
        }

        let mut finals = Vec::new();
        for _ in 0..2 {
            if let Envelope::Response(r) = recv_final(&mut gateway_rx).await {
                finals.push(r.request_id);
            }
        }
        finals.sort();
        assert_eq!(finals, ["req-a", "req-b"]);
        assert_eq!(b.memory.len().await, 0);

        b.shutdown.notify_waiters();
    }

    #[tokio::test]
    async fn failed_thought_aborts_and_notifies_gateway() {
        let b = bureau(DIAMOND_PLAN).await;
        let mut gateway_rx = b.router.attach("gateway-1").await;
        b.router
            .send(
                "gateway-1",
                CONDUCTOR_ADDRESS,
                Envelope::Registration(inquest_core::AgentRegistration {
                    agent_type: AgentType::Speaker,
                }),
            )
            .await
            .unwrap();

        b.memory.set("req-f:query", "doomed").await;
        b.memory.set("req-f:1:partial", "junk").await;
        b.router
            .send(
                "gateway-1",
                CONDUCTOR_ADDRESS,
                Envelope::Thought(Thought {
                    request_id: "req-f".into(),
                    thought_type: ThoughtType::Failed,
                    content: "worker exploded".into(),
                    impressions: vec![],
                    metadata: Default::default(),
                }),
            )
            .await
            .unwrap();

        match recv_final(&mut gateway_rx).await {
            Envelope::Thought(t) => {
                assert_eq!(t.thought_type, ThoughtType::Failed);
                assert_eq!(t.content, "worker exploded");
            }
            other => panic!("expected failed thought, got {}", other.kind()),
        }

        // Query preserved, partial impressions gone.
        assert_eq!(b.memory.get("req-f:query").await.as_deref(), Some("doomed"));
        assert!(b.memory.get("req-f:1:partial").await.is_none());

        b.shutdown.notify_waiters();
    }
}
