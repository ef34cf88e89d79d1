//! The planner turns a user question into a YAML workflow.
//!
//! The LLM gets one shot; anything that does not validate as a DAG falls
//! back to the fixed plan from the agent config, so a planning hiccup never
//! takes the request down.

use async_trait::async_trait;
use tracing::{debug, warn};

use inquest_bus::{Address, Agent, AgentContext, Envelope};
use inquest_core::{keys, AgentGoalType, AgentType, Error};
use inquest_llm::{render_prompt, AgentConfigStore};
use inquest_memory::SharedMemory;

use crate::worker::{reply_failed, reply_resolved, strip_code_fence, Cognition};

pub struct PlannerAgent {
    cognition: Cognition,
    memory: SharedMemory,
    plan_prompt: String,
    fixed_plan: String,
}

impl PlannerAgent {
    pub fn new(
        cognition: Cognition,
        memory: SharedMemory,
        store: &AgentConfigStore,
    ) -> Result<Self, Error> {
        let plan_prompt = store
            .prompt(AgentType::Planner, "default")
            .ok_or_else(|| Error::Validation("planner prompt 'default' not configured".into()))?
            .to_string();
        let fixed_plan = store
            .schema(AgentType::Planner, "fixed_plan")
            .map(|schema| serde_yaml::to_string(schema).unwrap_or_default())
            .ok_or_else(|| Error::Validation("planner schema 'fixed_plan' not configured".into()))?;
        Ok(Self {
            cognition,
            memory,
            plan_prompt,
            fixed_plan,
        })
    }

    /// A plan is acceptable when the graph engine would accept it.
    fn validates(plan_yaml: &str) -> bool {
        inquest_orchestrator::GraphState::parse(plan_yaml).is_ok()
    }

    async fn produce_plan(&self, query: &str) -> String {
        let prompt = render_prompt(&self.plan_prompt, &[("query", query)]);
        match self.cognition.think("", &prompt).await {
            Ok(reply) => {
                let candidate = strip_code_fence(&reply).to_string();
                if Self::validates(&candidate) {
                    debug!("planner produced a valid plan");
                    candidate
                } else {
                    warn!("planner output did not validate, using fixed plan");
                    self.fixed_plan.clone()
                }
            }
            Err(e) => {
                warn!(error = %e, "planner LLM unavailable, using fixed plan");
                self.fixed_plan.clone()
            }
        }
    }
}

#[async_trait]
impl Agent for PlannerAgent {
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
        if goal.goal_type != AgentGoalType::Plan {
            warn!(request_id = %goal.request_id, "planner received non-PLAN goal");
            return reply_failed(
                ctx,
                &from,
                &goal,
                format!("invalid goal type for planner: {}", goal.goal_type.as_str()),
                Default::default(),
            )
            .await;
        }

        let query = match self.memory.get(&keys::query_key(&goal.request_id)).await {
            Some(q) => q,
            None => goal.content.clone(),
        };
        let plan = self.produce_plan(&query).await;
        reply_resolved(ctx, &from, &goal, plan, vec![]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::mock_cognition;
    use inquest_llm::AgentConfigStore;

    const STORE_YAML: &str = r#"
planner:
  prompts:
    default: "Plan for: {query}"
  schemas:
    fixed_plan:
      graph:
        nodes:
          - id: only
            type: synthesize
        edges: []
        entry_nodes: [only]
        terminal_node: only
"#;

    const GOOD_PLAN: &str = r#"
graph:
  nodes:
    - id: n1
      type: compute
  edges: []
  entry_nodes: [n1]
  terminal_node: n1
"#;

    fn planner(replies: Vec<Result<String, String>>) -> (PlannerAgent, SharedMemory) {
        let store = AgentConfigStore::from_yaml(STORE_YAML).unwrap();
        let memory = SharedMemory::new();
        let agent = PlannerAgent::new(mock_cognition(replies), memory.clone(), &store).unwrap();
        (agent, memory)
    }

    #[tokio::test]
    async fn valid_llm_plan_is_used() {
        let (agent, _) = planner(vec![Ok(GOOD_PLAN.to_string())]);
        let plan = agent.produce_plan("2+2").await;
        assert!(plan.contains("terminal_node: n1"));
    }

    #[tokio::test]
    async fn fenced_llm_plan_is_unwrapped() {
        let (agent, _) = planner(vec![Ok(format!("```yaml\n{GOOD_PLAN}\n```"))]);
        let plan = agent.produce_plan("2+2").await;
        assert!(plan.contains("terminal_node: n1"));
    }

    #[tokio::test]
    async fn invalid_llm_plan_falls_back() {
        let (agent, _) = planner(vec![Ok("graph: nonsense".to_string())]);
        let plan = agent.produce_plan("2+2").await;
        assert!(plan.contains("terminal_node: only"));
    }

    #[tokio::test]
    async fn llm_error_falls_back() {
        let (agent, _) = planner(vec![Err("down".to_string())]);
        let plan = agent.produce_plan("2+2").await;
        assert!(plan.contains("terminal_node: only"));
    }

    #[test]
    fn fixed_plan_validates() {
        let (agent, _) = {
            let store = AgentConfigStore::from_yaml(STORE_YAML).unwrap();
            let memory = SharedMemory::new();
            (
                PlannerAgent::new(mock_cognition(vec![]), memory.clone(), &store).unwrap(),
                memory,
            )
        };
        assert!(PlannerAgent::validates(&agent.fixed_plan));
    }
}
