pub mod crawler;
pub mod enqueue;
pub mod http;

pub use crawler::{CrawlOutcome, Crawler, CrawlerPipeline};
pub use enqueue::{spawn_enqueue_manager, DiscoverySender};
