use thiserror::Error;

/// Single error kind for the backing store — callers never see partial
/// success.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("value encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<LedgerError> for inquest_core::Error {
    fn from(e: LedgerError) -> Self {
        inquest_core::Error::Ledger(e.to_string())
    }
}
