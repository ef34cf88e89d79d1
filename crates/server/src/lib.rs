pub mod chat;
pub mod state;

pub use chat::build_router;
pub use state::{ChatState, RequestStatus};
