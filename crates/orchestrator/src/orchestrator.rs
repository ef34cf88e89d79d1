//! Owns the live graphs: dispatches ready nodes to workers, merges fan-out
//! results into successors, detects completion and stalls, and guarantees
//! at-most-once completion signalling per node.
//!
//! All sends go out through the conductor's context, so worker replies flow
//! back to the conductor and get routed here.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use inquest_bus::{AgentContext, AgentRegistry, Envelope};
use inquest_core::{
    keys, AgentGoal, AgentGoalType, AgentType, Error, ReplanRequest, Response, Thought,
    ThoughtType,
};
use inquest_memory::SharedMemory;

use crate::graph::GraphState;

pub struct Orchestrator {
    registry: AgentRegistry,
    memory: SharedMemory,
    graphs: Mutex<HashMap<String, GraphState>>,
}

impl Orchestrator {
    pub fn new(registry: AgentRegistry, memory: SharedMemory) -> Self {
        Self {
            registry,
            memory,
            graphs: Mutex::new(HashMap::new()),
        }
    }

    /// Validate a plan and start executing it. Invalid plans never start:
    /// they go straight back to the conductor as a replan request, with the
    /// session query preserved.
    pub async fn start_graph(
        &self,
        ctx: &AgentContext,
        request_id: &str,
        plan_yaml: &str,
    ) -> Result<(), Error> {
        info!(request_id, "starting new graph");
        let state = match GraphState::parse(plan_yaml) {
            Ok(state) => state,
            Err(e) => {
                error!(request_id, error = %e, "plan rejected");
                return self.request_replan(ctx, request_id, &e.to_string()).await;
            }
        };

        self.graphs.lock().await.insert(request_id.to_string(), state);
        self.dispatch(ctx, request_id).await
    }

    /// A worker resolved a node: merge its impressions, release successors,
    /// and either finish the request or keep dispatching.
    pub async fn handle_step_completion(
        &self,
        ctx: &AgentContext,
        request_id: &str,
        node_id: &str,
        impressions: Vec<String>,
    ) -> Result<(), Error> {
        info!(request_id, node_id, count = impressions.len(), "step complete");

        let complete = {
            let mut graphs = self.graphs.lock().await;
            let Some(state) = graphs.get_mut(request_id) else {
                warn!(request_id, node_id, "completion for unknown graph");
                return Ok(());
            };
            state.on_node_complete(node_id, impressions);
            state.is_complete()
        };

        if complete {
            self.finish(ctx, request_id).await
        } else {
            self.dispatch(ctx, request_id).await
        }
    }

    /// A worker failed: abort the graph, keep the query for a retry, tell
    /// the gateway so the user hears about it.
    pub async fn handle_failure(
        &self,
        ctx: &AgentContext,
        request_id: &str,
        reason: &str,
    ) -> Result<(), Error> {
        warn!(request_id, reason, "graph failed");
        self.graphs.lock().await.remove(request_id);
        self.memory.clear_session(request_id, true).await;

        if let Some(gateway) = self.registry.get_agent(AgentType::Speaker).await {
            let failure = Thought {
                request_id: request_id.to_string(),
                thought_type: ThoughtType::Failed,
                content: reason.to_string(),
                impressions: vec![],
                metadata: Default::default(),
            };
            ctx.send(&gateway, Envelope::Thought(failure)).await?;
        }
        Ok(())
    }

    /// One dispatch tick: drain the ready queue, sending a TASK goal per
    /// node. A node whose agent type has no registered worker stays at the
    /// front of the queue and blocks the tick; it is retried on the next
    /// one. Afterwards, escalate a stall if the graph deadlocked.
    pub async fn dispatch(&self, ctx: &AgentContext, request_id: &str) -> Result<(), Error> {
        loop {
            let dispatched = {
                let mut graphs = self.graphs.lock().await;
                let Some(state) = graphs.get_mut(request_id) else {
                    return Ok(());
                };

                let Some((node_id, agent_type)) = state.peek_ready() else {
                    break;
                };
                let node_id = node_id.to_string();

                let Some(address) = self.registry.get_agent(agent_type).await else {
                    warn!(request_id, node_id = %node_id, agent_type = %agent_type, "no agent available, will retry");
                    break;
                };

                let Some((node_id, step_id)) = state.dispatch_front() else {
                    break;
                };
                let input_keys = state.inputs_for(&node_id);
                Some((node_id, step_id, address, input_keys))
            };

            let Some((node_id, step_id, address, input_keys)) = dispatched else {
                break;
            };

            let mut metadata = std::collections::BTreeMap::new();
            metadata.insert("node_id".to_string(), node_id.clone());
            metadata.insert("step_id".to_string(), step_id.to_string());

            let goal = AgentGoal {
                request_id: request_id.to_string(),
                goal_type: AgentGoalType::Task,
                content: keys::render_key_list(&input_keys),
                metadata,
            };

            info!(request_id, node_id = %node_id, step_id, to = %address, "dispatching node");
            if let Err(e) = ctx.send(&address, Envelope::Goal(goal)).await {
                warn!(request_id, node_id = %node_id, error = %e, "send failed, requeueing node");
                let mut graphs = self.graphs.lock().await;
                if let Some(state) = graphs.get_mut(request_id) {
                    state.requeue_front(node_id);
                }
                break;
            }
        }

        let stalled = {
            let graphs = self.graphs.lock().await;
            graphs.get(request_id).map(|s| s.has_stalled()).unwrap_or(false)
        };
        if stalled {
            error!(request_id, "graph stalled");
            return self
                .request_replan(ctx, request_id, "Graph execution stalled, possible cycle in plan.")
                .await;
        }
        Ok(())
    }

    /// Terminal path: read the terminal node's single impression, hand the
    /// final response to the gateway, and drop the whole session including
    /// the query key.
    async fn finish(&self, ctx: &AgentContext, request_id: &str) -> Result<(), Error> {
        let terminal_key = {
            let graphs = self.graphs.lock().await;
            let Some(state) = graphs.get(request_id) else {
                return Ok(());
            };
            state.terminal_outputs().first().cloned()
        };

        let Some(terminal_key) = terminal_key else {
            return self
                .handle_failure(ctx, request_id, "terminal node produced no impressions")
                .await;
        };

        let Some(final_answer) = self.memory.get(&terminal_key).await else {
            return self
                .handle_failure(
                    ctx,
                    request_id,
                    &format!("missing terminal impression '{terminal_key}'"),
                )
                .await;
        };

        info!(request_id, "graph execution complete");
        if let Some(gateway) = self.registry.get_agent(AgentType::Speaker).await {
            let response = Response {
                request_id: request_id.to_string(),
                content: final_answer,
                kind: Response::FINAL,
            };
            ctx.send(&gateway, Envelope::Response(response)).await?;
        } else {
            warn!(request_id, "no gateway registered, dropping final answer");
        }

        self.cleanup(request_id, false).await;
        Ok(())
    }

    async fn request_replan(
        &self,
        ctx: &AgentContext,
        request_id: &str,
        reason: &str,
    ) -> Result<(), Error> {
        self.cleanup(request_id, true).await;
        let replan = ReplanRequest {
            request_id: request_id.to_string(),
            reason: reason.to_string(),
        };
        ctx.send(inquest_bus::CONDUCTOR_ADDRESS, Envelope::Replan(replan))
            .await
            .map_err(Error::from)
    }

    async fn cleanup(&self, request_id: &str, preserve_query: bool) {
        self.graphs.lock().await.remove(request_id);
        self.memory.clear_session(request_id, preserve_query).await;
    }

    /// Test / introspection hook.
    pub async fn has_graph(&self, request_id: &str) -> bool {
        self.graphs.lock().await.contains_key(request_id)
    }
}
