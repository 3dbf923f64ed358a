//! Retry with exponential backoff and jitter.

use errors::ClientError;
use std::time::Duration;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error,
/// or exhausts `max_attempts`. Only transient errors (see
/// [`ClientError::is_transient`]) are retried; `CircuitOpen` and
/// `RateLimitExceeded` propagate immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    settings: &RetrySettings,
    operation: F,
) -> Result<T, ClientError>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    let mut backoff_strategy = ExponentialBackoff::from_millis(settings.base_delay_ms)
        .map(|duration| {
            let capped = duration.min(Duration::from_millis(settings.max_delay_ms));
            jitter(capped)
        });

    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt >= settings.max_attempts {
                    return Err(e);
                }
                metrics::counter!("client_retries_total").increment(1);
                tracing::warn!(attempt = attempt, error = %e, "Transient provider error, retrying");

                if let Some(delay) = backoff_strategy.next() {
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}
