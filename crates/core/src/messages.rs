use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Agent taxonomy ───────────────────────────────────────────────────

/// The closed set of worker roles. Determines model configuration and
/// message routing; plan nodes name these types on the wire (lowercase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Planner,
    Retrieve,
    Scout,
    Semantics,
    Coder,
    Compute,
    Reason,
    Synthesize,
    Validate,
    Speaker,
    Conductor,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Planner => "planner",
            AgentType::Retrieve => "retrieve",
            AgentType::Scout => "scout",
            AgentType::Semantics => "semantics",
            AgentType::Coder => "coder",
            AgentType::Compute => "compute",
            AgentType::Reason => "reason",
            AgentType::Synthesize => "synthesize",
            AgentType::Validate => "validate",
            AgentType::Speaker => "speaker",
            AgentType::Conductor => "conductor",
        }
    }

    /// Case-insensitive parse of the wire form.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "planner" => Some(AgentType::Planner),
            "retrieve" => Some(AgentType::Retrieve),
            "scout" => Some(AgentType::Scout),
            "semantics" => Some(AgentType::Semantics),
            "coder" => Some(AgentType::Coder),
            "compute" => Some(AgentType::Compute),
            "reason" => Some(AgentType::Reason),
            "synthesize" => Some(AgentType::Synthesize),
            "validate" => Some(AgentType::Validate),
            "speaker" => Some(AgentType::Speaker),
            "conductor" => Some(AgentType::Conductor),
            _ => None,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of flow from the orchestrator to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentGoalType {
    Plan,
    Task,
    Synthesis,
    Unknown,
}

impl AgentGoalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentGoalType::Plan => "plan",
            AgentGoalType::Task => "task",
            AgentGoalType::Synthesis => "synthesis",
            AgentGoalType::Unknown => "unknown",
        }
    }
}

/// Worker → orchestrator reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    SubGoal,
    UserQuery,
    Resolved,
    Failed,
    Answer,
}

// ── Messages ─────────────────────────────────────────────────────────

/// A task (goal) assigned to a worker. `content` carries either the raw
/// query (PLAN) or the stringified list of input impression keys (TASK);
/// `metadata` always carries `node_id` and `step_id` for TASK goals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGoal {
    pub request_id: String,
    #[serde(rename = "type")]
    pub goal_type: AgentGoalType,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// The outcome of a goal. `impressions` lists the SharedMemory keys the
/// worker wrote; `metadata` echoes `node_id` and `goal_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub request_id: String,
    #[serde(rename = "type")]
    pub thought_type: ThoughtType,
    pub content: String,
    #[serde(default)]
    pub impressions: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Terminal or incremental answer flowing toward the gateway.
/// `kind`: -1 complete, 0 heartbeat, >0 more chunks follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: i32,
}

impl Response {
    pub const FINAL: i32 = -1;
    pub const HEARTBEAT: i32 = 0;

    pub fn is_final(&self) -> bool {
        self.kind == Self::FINAL
    }
}

/// The initial query from the user. A request id is minted when the caller
/// did not supply one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuery {
    pub text: String,
    #[serde(default)]
    pub request_id: String,
}

impl UserQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(text: impl Into<String>, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        if request_id.is_empty() {
            Self::new(text)
        } else {
            Self {
                text: text.into(),
                request_id,
            }
        }
    }
}

/// Announces a worker to the conductor's registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_type: AgentType,
}

/// Sent by the orchestrator to the conductor when a graph stalls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanRequest {
    pub request_id: String,
    pub reason: String,
}
