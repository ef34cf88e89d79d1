pub mod message;
pub mod registry;
pub mod router;
pub mod runner;

pub use message::{Delivery, Envelope};
pub use registry::AgentRegistry;
pub use router::{Address, BusError, Router};
pub use runner::{spawn_agent, Agent, AgentContext, CONDUCTOR_ADDRESS};
