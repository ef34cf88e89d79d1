pub mod provider;
pub mod prompts;
pub mod registry;

pub use prompts::{render_prompt, AgentConfigStore, AgentProfile};
pub use provider::{LlmError, LlmProvider, Message, OllamaProvider, Role};
pub use registry::{ApiType, ModelRegistry, ModelSpec};
