//! Program-of-thought execution: run untrusted program text in a child
//! process with a wall-clock timeout. No LLM involvement.
//!
//! stdout becomes the node's impression on success; a timeout or non-zero
//! exit becomes a FAILED thought with stderr, and the metadata carries the
//! child's exit code (`-1` for timeout or system error).

use std::collections::BTreeMap;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use inquest_bus::{Address, Agent, AgentContext, Envelope};
use inquest_core::{keys, AgentGoal, AgentGoalType, AgentType, Error};
use inquest_memory::SharedMemory;

use crate::worker::{reply_failed, reply_resolved};

/// Wall-clock budget when the goal does not carry one.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

const IMPRESSION: &str = "stdout";

#[derive(Debug)]
struct Execution {
    stdout: String,
    stderr: String,
    exit_code: i32,
    timed_out: bool,
}

#[derive(Clone)]
pub struct ComputeAgent {
    memory: SharedMemory,
    interpreter: String,
}

impl ComputeAgent {
    pub fn new(memory: SharedMemory, interpreter: impl Into<String>) -> Self {
        Self {
            memory,
            interpreter: interpreter.into(),
        }
    }

    /// Interpreter from `COMPUTE_INTERPRETER`, defaulting to python3.
    pub fn from_env(memory: SharedMemory) -> Self {
        let interpreter =
            std::env::var("COMPUTE_INTERPRETER").unwrap_or_else(|_| "python3".to_string());
        Self::new(memory, interpreter)
    }

    /// The program source: concatenated input impressions when the node has
    /// predecessors, otherwise the goal content itself.
    async fn resolve_source(&self, goal: &AgentGoal) -> Option<String> {
        let input_keys = keys::parse_key_list(&goal.content);
        if input_keys.is_empty() {
            let content = goal.content.trim();
            return (!content.is_empty() && content != "[]").then(|| content.to_string());
        }
        let mut source = String::new();
        for key in &input_keys {
            source.push_str(&self.memory.get(key).await?);
            source.push('\n');
        }
        Some(source)
    }

    async fn execute(&self, source: &str, timeout: Duration) -> Result<Execution, Error> {
        let mut script = tempfile::NamedTempFile::new()
            .map_err(|e| Error::Worker(format!("failed to create temp file: {e}")))?;
        script
            .write_all(source.as_bytes())
            .map_err(|e| Error::Worker(format!("failed to write program: {e}")))?;

        let child = Command::new(&self.interpreter)
            .arg(script.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Worker(format!("failed to spawn interpreter: {e}")))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(Execution {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
            }),
            Ok(Err(e)) => Ok(Execution {
                stdout: String::new(),
                stderr: e.to_string(),
                exit_code: -1,
                timed_out: false,
            }),
            Err(_) => Ok(Execution {
                stdout: String::new(),
                stderr: "Execution timed out.".to_string(),
                exit_code: -1,
                timed_out: true,
            }),
        }
    }
}

#[async_trait]
impl Agent for ComputeAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Compute
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

        let Some(source) = self.resolve_source(&goal).await else {
            return reply_failed(
                ctx,
                &from,
                &goal,
                "compute received no program source".to_string(),
                Default::default(),
            )
            .await;
        };

        let timeout = goal
            .metadata
            .get("timeout")
            .and_then(|t| t.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        info!(request_id = %goal.request_id, timeout_secs = timeout.as_secs(), "executing program");
        let execution = match self.execute(&source, timeout).await {
            Ok(execution) => execution,
            Err(e) => {
                let mut extra = BTreeMap::new();
                extra.insert("exit_code".to_string(), "-1".to_string());
                return reply_failed(ctx, &from, &goal, e.to_string(), extra).await;
            }
        };

        let mut extra = BTreeMap::new();
        extra.insert("exit_code".to_string(), execution.exit_code.to_string());

        if execution.timed_out || execution.exit_code != 0 {
            warn!(
                request_id = %goal.request_id,
                exit_code = execution.exit_code,
                timed_out = execution.timed_out,
                "program failed"
            );
            return reply_failed(ctx, &from, &goal, execution.stderr, extra).await;
        }

        let step_id = goal.metadata.get("step_id").cloned().unwrap_or_default();
        let output_key = keys::impression_key(&goal.request_id, &step_id, IMPRESSION);
        self.memory.set(output_key.clone(), execution.stdout.clone()).await;

        let thought = inquest_core::Thought {
            request_id: goal.request_id.clone(),
            thought_type: inquest_core::ThoughtType::Resolved,
            content: execution.stdout,
            impressions: vec![output_key],
            metadata: {
                let mut m = crate::worker::reply_metadata(&goal);
                m.extend(extra);
                m
            },
        };
        ctx.send(&from, Envelope::Thought(thought)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inquest_bus::Router;
    use inquest_core::ThoughtType;

    fn goal(content: &str, timeout: Option<&str>) -> AgentGoal {
        let mut metadata = BTreeMap::new();
        metadata.insert("node_id".into(), "n1".into());
        metadata.insert("step_id".into(), "1".into());
        if let Some(t) = timeout {
            metadata.insert("timeout".into(), t.into());
        }
        AgentGoal {
            request_id: "r1".into(),
            goal_type: AgentGoalType::Task,
            content: content.into(),
            metadata,
        }
    }

    async fn run(agent: &ComputeAgent, g: AgentGoal) -> inquest_core::Thought {
        let router = Router::new();
        let mut caller_rx = router.attach("caller").await;
        let ctx = AgentContext::new("compute-1", router.clone());
        agent
            .handle(&ctx, "caller".into(), Envelope::Goal(g))
            .await
            .unwrap();
        let delivery = caller_rx.recv().await.unwrap();
        match delivery.envelope {
            Envelope::Thought(t) => t,
            other => panic!("expected thought, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn stdout_becomes_the_impression() {
        let memory = SharedMemory::new();
        let agent = ComputeAgent::new(memory.clone(), "sh");
        let thought = run(&agent, goal("echo $((2+2))", None)).await;

        assert_eq!(thought.thought_type, ThoughtType::Resolved);
        assert_eq!(thought.content, "4\n");
        assert_eq!(thought.metadata.get("exit_code").unwrap(), "0");
        assert_eq!(memory.get("r1:1:stdout").await.unwrap(), "4\n");
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_stderr() {
        let agent = ComputeAgent::new(SharedMemory::new(), "sh");
        let thought = run(&agent, goal("echo boom >&2; exit 3", None)).await;

        assert_eq!(thought.thought_type, ThoughtType::Failed);
        assert!(thought.content.contains("boom"));
        assert_eq!(thought.metadata.get("exit_code").unwrap(), "3");
    }

    #[tokio::test]
    async fn timeout_reports_exit_code_minus_one() {
        let agent = ComputeAgent::new(SharedMemory::new(), "sh");
        let thought = run(&agent, goal("sleep 10", Some("1"))).await;

        assert_eq!(thought.thought_type, ThoughtType::Failed);
        assert!(thought.content.contains("timed out"));
        assert_eq!(thought.metadata.get("exit_code").unwrap(), "-1");
    }

    #[tokio::test]
    async fn program_from_input_impressions() {
        let memory = SharedMemory::new();
        memory.set("r1:0:code", "echo from-impression").await;
        let agent = ComputeAgent::new(memory.clone(), "sh");
        let thought = run(&agent, goal("[\"r1:0:code\"]", None)).await;

        assert_eq!(thought.thought_type, ThoughtType::Resolved);
        assert_eq!(thought.content, "from-impression\n");
    }

    #[tokio::test]
    async fn empty_source_fails() {
        let agent = ComputeAgent::new(SharedMemory::new(), "sh");
        let thought = run(&agent, goal("[]", None)).await;
        assert_eq!(thought.thought_type, ThoughtType::Failed);
        assert!(thought.content.contains("no program source"));
    }
}
