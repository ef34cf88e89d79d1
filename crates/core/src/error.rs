use thiserror::Error;

/// Cross-cutting error kinds shared across the bureau, crawler, and workers.
///
/// Crate-local error enums (`LedgerError`, `LlmError`, …) convert into these
/// at subsystem boundaries so the conductor and workers reason about a small,
/// closed set of failure classes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("shutdown signalled")]
    ShutdownSignalled,
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(0)
        } else {
            Error::Transport(e.to_string())
        }
    }
}
