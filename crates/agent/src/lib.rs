pub mod architect;
pub mod compute;
pub mod gateway;
pub mod planner;
pub mod retrieve;
pub mod scout;
pub mod search;
pub mod worker;

pub use architect::ArchitectAgent;
pub use compute::ComputeAgent;
pub use gateway::GatewayAgent;
pub use planner::PlannerAgent;
pub use retrieve::RetrieveAgent;
pub use scout::ScoutAgent;
pub use search::{DuckDuckGoSearch, WebSearch};
pub use worker::Cognition;
