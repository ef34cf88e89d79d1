//! Per-request execution graph: plan parsing, validation, and Kahn-style
//! scheduling state.
//!
//! A plan is untrusted input. Parsing validates the whole contract before a
//! single node runs: every referenced id exists, node types are real agent
//! types, entries have in-degree 0, there is exactly one terminal reachable
//! from the entry set, and the graph is acyclic.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Deserialize;
use thiserror::Error;

use inquest_core::AgentType;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("invalid plan YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("plan has no nodes")]
    Empty,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("unknown node id '{0}' referenced by {1}")]
    UnknownNode(String, &'static str),

    #[error("invalid agent type '{1}' on node '{0}'")]
    InvalidAgentType(String, String),

    #[error("entry node '{0}' has incoming edges")]
    EntryHasIncomingEdges(String),

    #[error("plan has no entry nodes")]
    NoEntryNodes,

    #[error("graph execution stalled, possible cycle in plan")]
    Cycle,

    #[error("graph execution stalled, terminal node '{0}' unreachable from entries")]
    UnreachableTerminal(String),
}

impl From<PlanError> for inquest_core::Error {
    fn from(e: PlanError) -> Self {
        inquest_core::Error::Validation(e.to_string())
    }
}

// ── Wire format ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlanDoc {
    graph: GraphDef,
}

#[derive(Debug, Deserialize)]
struct GraphDef {
    nodes: Vec<NodeDef>,
    #[serde(default)]
    edges: Vec<EdgeDef>,
    entry_nodes: Vec<String>,
    terminal_node: String,
}

#[derive(Debug, Deserialize)]
struct NodeDef {
    id: String,
    #[serde(rename = "type")]
    node_type: String,
}

#[derive(Debug, Deserialize)]
struct EdgeDef {
    from: String,
    to: String,
}

// ── Runtime state ────────────────────────────────────────────────────

/// Scheduling bookkeeping for one in-flight plan.
#[derive(Debug)]
pub struct GraphState {
    /// node id → agent type.
    nodes: HashMap<String, AgentType>,
    /// node id → direct predecessors, in edge-declaration order.
    dependencies: HashMap<String, Vec<String>>,
    /// node id → direct successors, in edge-declaration order.
    dependents: HashMap<String, Vec<String>>,
    in_degree: HashMap<String, usize>,
    execution_queue: VecDeque<String>,
    running: HashSet<String>,
    completed: HashSet<String>,
    /// node id → impression keys produced (set on RESOLVED only).
    node_outputs: HashMap<String, Vec<String>>,
    step_counter: u64,
    terminal_node: String,
}

impl GraphState {
    /// Parse and fully validate a YAML plan.
    pub fn parse(plan_yaml: &str) -> Result<Self, PlanError> {
        let doc: PlanDoc = serde_yaml::from_str(plan_yaml)?;
        let def = doc.graph;

        if def.nodes.is_empty() {
            return Err(PlanError::Empty);
        }
        if def.entry_nodes.is_empty() {
            return Err(PlanError::NoEntryNodes);
        }

        let mut nodes = HashMap::new();
        for node in &def.nodes {
            let agent_type = AgentType::parse(&node.node_type).ok_or_else(|| {
                PlanError::InvalidAgentType(node.id.clone(), node.node_type.clone())
            })?;
            if nodes.insert(node.id.clone(), agent_type).is_some() {
                return Err(PlanError::DuplicateNode(node.id.clone()));
            }
        }

        let mut dependencies: HashMap<String, Vec<String>> =
            def.nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect();
        let mut dependents: HashMap<String, Vec<String>> =
            def.nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect();
        let mut in_degree: HashMap<String, usize> =
            def.nodes.iter().map(|n| (n.id.clone(), 0)).collect();

        for edge in &def.edges {
            if !nodes.contains_key(&edge.from) {
                return Err(PlanError::UnknownNode(edge.from.clone(), "an edge"));
            }
            if !nodes.contains_key(&edge.to) {
                return Err(PlanError::UnknownNode(edge.to.clone(), "an edge"));
            }
            if let Some(deps) = dependencies.get_mut(&edge.to) {
                deps.push(edge.from.clone());
            }
            if let Some(deps) = dependents.get_mut(&edge.from) {
                deps.push(edge.to.clone());
            }
            *in_degree.entry(edge.to.clone()).or_default() += 1;
        }

        for entry in &def.entry_nodes {
            if !nodes.contains_key(entry) {
                return Err(PlanError::UnknownNode(entry.clone(), "entry_nodes"));
            }
            if in_degree[entry] != 0 {
                return Err(PlanError::EntryHasIncomingEdges(entry.clone()));
            }
        }
        if !nodes.contains_key(&def.terminal_node) {
            return Err(PlanError::UnknownNode(def.terminal_node.clone(), "terminal_node"));
        }

        // Acyclicity: a full Kahn pass must consume every node.
        let mut degrees = in_degree.clone();
        let mut frontier: VecDeque<String> = degrees
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut visited = 0usize;
        while let Some(id) = frontier.pop_front() {
            visited += 1;
            for next in &dependents[&id] {
                if let Some(d) = degrees.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        frontier.push_back(next.clone());
                    }
                }
            }
        }
        if visited != nodes.len() {
            return Err(PlanError::Cycle);
        }

        // Terminal reachability from the entry set.
        let mut reachable: HashSet<&String> = HashSet::new();
        let mut stack: Vec<&String> = def.entry_nodes.iter().collect();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            for next in &dependents[id] {
                stack.push(next);
            }
        }
        if !reachable.contains(&def.terminal_node) {
            return Err(PlanError::UnreachableTerminal(def.terminal_node.clone()));
        }

        // Initial ready set: every node with in-degree 0, in declaration order.
        let execution_queue: VecDeque<String> = def
            .nodes
            .iter()
            .filter(|n| in_degree[&n.id] == 0)
            .map(|n| n.id.clone())
            .collect();

        Ok(Self {
            nodes,
            dependencies,
            dependents,
            in_degree,
            execution_queue,
            running: HashSet::new(),
            completed: HashSet::new(),
            node_outputs: HashMap::new(),
            step_counter: 0,
            terminal_node: def.terminal_node,
        })
    }

    // ── Scheduling ───────────────────────────────────────────────────

    /// The node at the front of the ready queue, without dequeuing it.
    pub fn peek_ready(&self) -> Option<(&str, AgentType)> {
        self.execution_queue
            .front()
            .map(|id| (id.as_str(), self.nodes[id]))
    }

    /// Dequeue the front node into the running set and mint its step id.
    pub fn dispatch_front(&mut self) -> Option<(String, u64)> {
        let id = self.execution_queue.pop_front()?;
        self.step_counter += 1;
        self.running.insert(id.clone());
        Some((id, self.step_counter))
    }

    /// Undo a dispatch whose send failed: back to the front, retried next
    /// tick.
    pub fn requeue_front(&mut self, id: String) {
        self.running.remove(&id);
        self.execution_queue.push_front(id);
    }

    /// Input keys for a node: its predecessors' outputs concatenated in
    /// edge-declaration order, duplicates preserved.
    pub fn inputs_for(&self, id: &str) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(deps) = self.dependencies.get(id) {
            for dep in deps {
                if let Some(outputs) = self.node_outputs.get(dep) {
                    keys.extend(outputs.iter().cloned());
                }
            }
        }
        keys
    }

    /// Record a RESOLVED node: store outputs, release successors whose
    /// in-degree reaches zero.
    pub fn on_node_complete(&mut self, id: &str, outputs: Vec<String>) {
        self.running.remove(id);
        if !self.completed.insert(id.to_string()) {
            // At-most-once: a duplicate completion signal is ignored.
            return;
        }
        self.node_outputs.entry(id.to_string()).or_default().extend(outputs);

        let successors = self.dependents.get(id).cloned().unwrap_or_default();
        for next in successors {
            if let Some(degree) = self.in_degree.get_mut(&next) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    self.execution_queue.push_back(next);
                }
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.nodes.len()
    }

    /// Deadlocked: nothing ready, nothing running, not done.
    pub fn has_stalled(&self) -> bool {
        self.execution_queue.is_empty() && self.running.is_empty() && !self.is_complete()
    }

    pub fn terminal_node(&self) -> &str {
        &self.terminal_node
    }

    /// Outputs of the terminal node (empty before it resolves).
    pub fn terminal_outputs(&self) -> &[String] {
        self.node_outputs
            .get(&self.terminal_node)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running.contains(id)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIAMOND: &str = r#"
graph:
  nodes:
    - id: a
      type: retrieve
    - id: b
      type: scout
    - id: c
      type: synthesize
  edges:
    - from: a
      to: c
    - from: b
      to: c
  entry_nodes: [a, b]
  terminal_node: c
"#;

    #[test]
    fn parse_valid_plan() {
        let state = GraphState::parse(DIAMOND).unwrap();
        assert_eq!(state.node_count(), 3);
        assert_eq!(state.terminal_node(), "c");
        // Both entries ready, in declaration order.
        assert_eq!(state.peek_ready().map(|(id, _)| id.to_string()).unwrap(), "a");
    }

    #[test]
    fn reject_cycle() {
        let plan = r#"
graph:
  nodes:
    - id: a
      type: retrieve
    - id: b
      type: synthesize
  edges:
    - from: a
      to: b
    - from: b
      to: a
  entry_nodes: [a]
  terminal_node: b
"#;
        // Cyclic plans also trip the entry-degree check; build one where the
        // cycle sits off to the side of a clean entry.
        let err = GraphState::parse(plan).unwrap_err();
        assert!(matches!(err, PlanError::EntryHasIncomingEdges(_) | PlanError::Cycle));

        let side_cycle = r#"
graph:
  nodes:
    - id: start
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
  entry_nodes: [start]
  terminal_node: start
"#;
        let err = GraphState::parse(side_cycle).unwrap_err();
        assert!(matches!(err, PlanError::Cycle));
        assert!(err.to_string().contains("stalled"));
    }

    #[test]
    fn reject_unknown_edge_reference() {
        let plan = r#"
graph:
  nodes:
    - id: a
      type: retrieve
  edges:
    - from: a
      to: ghost
  entry_nodes: [a]
  terminal_node: a
"#;
        assert!(matches!(
            GraphState::parse(plan).unwrap_err(),
            PlanError::UnknownNode(id, _) if id == "ghost"
        ));
    }

    #[test]
    fn reject_unreachable_terminal() {
        let plan = r#"
graph:
  nodes:
    - id: a
      type: retrieve
    - id: z
      type: synthesize
  edges: []
  entry_nodes: [a]
  terminal_node: z
"#;
        let err = GraphState::parse(plan).unwrap_err();
        assert!(matches!(err, PlanError::UnreachableTerminal(_)));
        assert!(err.to_string().contains("stalled"));
    }

    #[test]
    fn reject_bad_agent_type() {
        let plan = r#"
graph:
  nodes:
    - id: a
      type: wizard
  edges: []
  entry_nodes: [a]
  terminal_node: a
"#;
        assert!(matches!(
            GraphState::parse(plan).unwrap_err(),
            PlanError::InvalidAgentType(_, t) if t == "wizard"
        ));
    }

    #[test]
    fn kahn_progression_and_fan_in_order() {
        let mut state = GraphState::parse(DIAMOND).unwrap();

        let (a, step_a) = state.dispatch_front().unwrap();
        assert_eq!(a, "a");
        assert_eq!(step_a, 1);
        assert!(state.is_running("a"));

        let (b, step_b) = state.dispatch_front().unwrap();
        assert_eq!(b, "b");
        assert_eq!(step_b, 2);
        // c is not ready until both predecessors resolve.
        assert!(state.peek_ready().is_none());

        state.on_node_complete("a", vec!["r:1:a_out".into()]);
        assert!(state.peek_ready().is_none());
        state.on_node_complete("b", vec!["r:2:b_out".into(), "r:2:b_extra".into()]);

        // Now c is ready, with inputs in edge-declaration order (a before b).
        let (c, _) = state.peek_ready().map(|(id, t)| (id.to_string(), t)).unwrap();
        assert_eq!(c, "c");
        assert_eq!(
            state.inputs_for("c"),
            vec!["r:1:a_out", "r:2:b_out", "r:2:b_extra"]
        );

        let (c, step_c) = state.dispatch_front().unwrap();
        assert_eq!(step_c, 3);
        state.on_node_complete(&c, vec!["r:3:final".into()]);
        assert!(state.is_complete());
        assert_eq!(state.terminal_outputs(), ["r:3:final"]);
    }

    #[test]
    fn edge_dispatch_precondition_holds() {
        // Property: at the moment a node is dispatched, all its
        // predecessors are completed.
        let mut state = GraphState::parse(DIAMOND).unwrap();
        while let Some((id, _)) = state.dispatch_front() {
            for dep in state.dependencies.get(&id).cloned().unwrap_or_default() {
                assert!(state.is_completed(&dep), "{id} dispatched before {dep}");
            }
            state.on_node_complete(&id, vec![format!("r:0:{id}")]);
        }
        assert!(state.is_complete());
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let mut state = GraphState::parse(DIAMOND).unwrap();
        state.dispatch_front();
        state.on_node_complete("a", vec!["k1".into()]);
        state.on_node_complete("a", vec!["k2".into()]);
        assert_eq!(state.inputs_for("c"), vec!["k1"]);
    }

    #[test]
    fn requeue_front_restores_order() {
        let mut state = GraphState::parse(DIAMOND).unwrap();
        let (a, _) = state.dispatch_front().unwrap();
        state.requeue_front(a);
        assert_eq!(state.peek_ready().unwrap().0, "a");
        assert!(!state.is_running("a"));
    }

    #[test]
    fn single_node_plan() {
        let plan = r#"
graph:
  nodes:
    - id: n1
      type: compute
  edges: []
  entry_nodes: [n1]
  terminal_node: n1
"#;
        let mut state = GraphState::parse(plan).unwrap();
        let (n1, step) = state.dispatch_front().unwrap();
        assert_eq!((n1.as_str(), step), ("n1", 1));
        assert!(state.inputs_for("n1").is_empty());
        state.on_node_complete("n1", vec!["r:1:stdout".into()]);
        assert!(state.is_complete());
        assert!(!state.has_stalled());
    }
}
