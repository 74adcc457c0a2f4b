//! Retry with linear back-off for whole fetch attempts.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// `step`, `2 * step`, `3 * step`, ... for attempts 1, 2, 3, ...
pub fn linear_backoff(step: Duration) -> impl Fn(u32) -> Duration {
    move |attempt| step.saturating_mul(attempt)
}

/// Runs `operation` up to `max_attempts` times. Only errors for which
/// [`AppError::is_retriable`](crate::error::AppError::is_retriable) holds
/// are retried; the last error is returned once attempts run out.
pub async fn retry_with_backoff<T, F, Fut, B>(
    max_attempts: u32,
    backoff: B,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    B: Fn(u32) -> Duration,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() || attempt >= max_attempts {
                    return Err(err);
                }
                let delay = backoff(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Feed fetch failed, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
