//! Fetch retry loop.

use std::future::Future;

use adminsync_core::{QueryKey, SyncResult};

use crate::freshness::RetryPolicy;

/// Run `fetcher` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned unchanged.
pub async fn fetch_with_retry<T, F, Fut>(
    key: &QueryKey,
    retry: &RetryPolicy,
    fetcher: &F,
) -> SyncResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retry.attempts && err.is_retryable() => {
                let delay = retry.delay_for(attempt);
                attempt += 1;
                tracing::debug!(
                    key = %key,
                    attempt,
                    max_attempts = retry.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    attempts = attempt + 1,
                    error_kind = err.kind(),
                    status = err.status_code(),
                    error = %err,
                    "Fetch failed"
                );
                return Err(err);
            }
        }
    }
}
