pub mod shared;
pub mod vector;

pub use shared::SharedMemory;
pub use vector::{MemoryError, VectorDoc, VectorStore};
