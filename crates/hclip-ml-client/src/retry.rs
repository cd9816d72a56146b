//! Retry with exponential backoff for transient service errors.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{MlError, MlResult};

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(10);

fn delay_for_attempt(attempt: u32) -> Duration {
    BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_DELAY)
}

/// Run `operation`, retrying errors marked retryable up to `max_retries` times.
pub(crate) async fn with_retry<F, Fut, T>(operation_name: &str, max_retries: u32, operation: F) -> MlResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = MlResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}), retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map a reqwest error, classifying timeouts.
pub(crate) fn map_send_error(e: reqwest::Error, timeout: Duration) -> MlError {
    if e.is_timeout() {
        MlError::Timeout(timeout.as_secs())
    } else {
        MlError::Network(e)
    }
}
