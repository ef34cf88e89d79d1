//! Shared retry combinator: `base^attempt` exponential backoff between
//! attempts. Fetch retries, LLM retries, and the architect's condense bound
//! all take this shape.

use std::future::Future;
use std::time::Duration;

/// Run `op` up to `max_attempts` times, sleeping `base_secs^attempt` seconds
/// after each failure. Returns the last error when every attempt fails.
/// `max_attempts` of 0 is treated as 1.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base_secs: u64,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < max_attempts => {
                let delay = Duration::from_secs(base_secs.saturating_pow(attempt));
                tracing::debug!(attempt, delay_secs = delay.as_secs(), "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
