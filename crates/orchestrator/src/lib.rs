pub mod conductor;
pub mod graph;
pub mod orchestrator;

pub use conductor::Conductor;
pub use graph::{GraphState, PlanError};
pub use orchestrator::Orchestrator;
