//! Agent task runtime.
//!
//! Every agent is a supervised tokio task with an inbox: attach to the
//! router, announce the agent type to the conductor, then drain deliveries
//! until shutdown. Draining one inbox sequentially gives heavy workers
//! at-most-one-concurrent-task for free; stateless workers spawn a detached
//! task per goal inside `handle` and return immediately.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use inquest_core::{AgentRegistration, AgentType, Error};

use crate::message::{Delivery, Envelope};
use crate::router::{Address, BusError, Router};

/// Well-known address of the conductor.
pub const CONDUCTOR_ADDRESS: &str = "conductor";

/// A message-driven agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Process one delivery. Errors are logged by the runner; agents that
    /// owe a reply convert their own failures into FAILED thoughts instead.
    async fn handle(&self, ctx: &AgentContext, from: Address, envelope: Envelope)
        -> Result<(), Error>;

    /// Called once after the inbox is attached, before the first delivery.
    async fn started(&self, _ctx: &AgentContext) -> Result<(), Error> {
        Ok(())
    }
}

/// The agent's view of the network: its own address plus the router.
#[derive(Clone)]
pub struct AgentContext {
    pub address: Address,
    router: Router,
}

impl AgentContext {
    pub fn new(address: impl Into<Address>, router: Router) -> Self {
        Self {
            address: address.into(),
            router,
        }
    }

    pub async fn send(&self, to: &str, envelope: Envelope) -> Result<(), BusError> {
        self.router.send(&self.address, to, envelope).await
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// Attach, register, and run an agent until `shutdown` fires.
///
/// The inbox is attached before this returns, so a send issued right after
/// cannot miss the agent. Registration goes to the conductor unless the
/// agent *is* the conductor.
pub async fn spawn_agent(
    agent: Arc<dyn Agent>,
    router: Router,
    address: &str,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    let mut inbox = router.attach(address).await;
    let ctx = AgentContext::new(address, router);
    let address = address.to_string();

    tokio::spawn(async move {
        info!(address = %ctx.address, agent_type = %agent.agent_type(), "agent starting");

        if let Err(e) = agent.started(&ctx).await {
            warn!(address = %ctx.address, error = %e, "agent startup failed");
            return;
        }

        if ctx.address != CONDUCTOR_ADDRESS {
            let registration = Envelope::Registration(AgentRegistration {
                agent_type: agent.agent_type(),
            });
            if let Err(e) = ctx.send(CONDUCTOR_ADDRESS, registration).await {
                warn!(address = %ctx.address, error = %e, "registration failed");
            }
        }

        loop {
            tokio::select! {
                delivery = inbox.recv() => {
                    let Some(Delivery { from, envelope }) = delivery else {
                        break;
                    };
                    debug!(
                        address = %ctx.address,
                        from = %from,
                        kind = envelope.kind(),
                        "delivery"
                    );
                    if let Err(e) = agent.handle(&ctx, from, envelope).await {
                        warn!(address = %ctx.address, error = %e, "handler error");
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }

        ctx.router().detach(&address).await;
        info!(address, "agent stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use inquest_core::{AgentGoal, AgentGoalType, Thought, ThoughtType};
    use std::time::Duration;

    /// Replies RESOLVED to every goal it receives.
    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn agent_type(&self) -> AgentType {
            AgentType::Compute
        }

        async fn handle(
            &self,
            ctx: &AgentContext,
            from: Address,
            envelope: Envelope,
        ) -> Result<(), Error> {
            if let Envelope::Goal(goal) = envelope {
                let thought = Thought {
                    request_id: goal.request_id,
                    thought_type: ThoughtType::Resolved,
                    content: goal.content,
                    impressions: vec![],
                    metadata: goal.metadata,
                };
                ctx.send(&from, Envelope::Thought(thought)).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn agent_registers_and_echoes() {
        let router = Router::new();
        let shutdown = Arc::new(Notify::new());

        // Stand in for the conductor: capture the registration.
        let mut conductor_rx = router.attach(CONDUCTOR_ADDRESS).await;
        // Stand in for the orchestrator: capture the reply.
        let mut caller_rx = router.attach("caller").await;

        let handle = spawn_agent(
            Arc::new(EchoAgent),
            router.clone(),
            "compute-1",
            shutdown.clone(),
        )
        .await;

        let registration = conductor_rx.recv().await.unwrap();
        match registration.envelope {
            Envelope::Registration(r) => assert_eq!(r.agent_type, AgentType::Compute),
            other => panic!("expected registration, got {}", other.kind()),
        }

        router
            .send(
                "caller",
                "compute-1",
                Envelope::Goal(AgentGoal {
                    request_id: "r1".into(),
                    goal_type: AgentGoalType::Task,
                    content: "ping".into(),
                    metadata: Default::default(),
                }),
            )
            .await
            .unwrap();

        let reply = caller_rx.recv().await.unwrap();
        match reply.envelope {
            Envelope::Thought(t) => {
                assert_eq!(t.thought_type, ThoughtType::Resolved);
                assert_eq!(t.content, "ping");
            }
            other => panic!("expected thought, got {}", other.kind()),
        }

        shutdown.notify_waiters();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("agent should stop on shutdown")
            .unwrap();
        assert!(!router.is_attached("compute-1").await);
    }
}
