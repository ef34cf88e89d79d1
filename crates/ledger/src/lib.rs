pub mod crawl;
pub mod error;
pub mod ledger;

pub use crawl::{CrawlRecord, CrawlStatus, CrawlingLedger, SHUTDOWN_SENTINEL};
pub use error::LedgerError;
pub use ledger::Ledger;
