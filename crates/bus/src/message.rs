//! The tagged union of everything that travels between agents.
//!
//! Routing is by message variant, pattern-matched in the conductor and the
//! orchestrator — there are no string-keyed handler tables.

use inquest_core::{AgentGoal, AgentRegistration, ReplanRequest, Response, Thought, UserQuery};

use crate::router::Address;

#[derive(Debug, Clone)]
pub enum Envelope {
    Goal(AgentGoal),
    Thought(Thought),
    Response(Response),
    Query(UserQuery),
    Registration(AgentRegistration),
    Replan(ReplanRequest),
}

impl Envelope {
    /// Correlation id, where the variant carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Envelope::Goal(m) => Some(&m.request_id),
            Envelope::Thought(m) => Some(&m.request_id),
            Envelope::Response(m) => Some(&m.request_id),
            Envelope::Query(m) => Some(&m.request_id),
            Envelope::Replan(m) => Some(&m.request_id),
            Envelope::Registration(_) => None,
        }
    }

    /// Variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Goal(_) => "goal",
            Envelope::Thought(_) => "thought",
            Envelope::Response(_) => "response",
            Envelope::Query(_) => "query",
            Envelope::Registration(_) => "registration",
            Envelope::Replan(_) => "replan",
        }
    }
}

/// A routed message: the envelope plus the sender's address, so receivers
/// can reply and the conductor can reverse-map senders to agent types.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: Address,
    pub envelope: Envelope,
}
