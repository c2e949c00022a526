use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::contracts::PipelineError;

/// # NDOC
/// component: `retry`
/// purpose: Shared exponential-backoff-with-full-jitter retry combinator used
///   by every external-collaborator call site (search, ad archive, warehouse).
/// invariants:
///   - Non-retryable errors (per `PipelineError::is_retryable`) return on the
///     first attempt; the combinator never retries a fatal error.
///   - Backoff base doubles each attempt, capped at `max_backoff`; jitter is
///     drawn uniformly in `[0, backoff)` (the "full jitter" strategy).
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    max_backoff: Duration,
    mut operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let backoff = base_delay
                    .saturating_mul(1u32 << (attempt - 1).min(20))
                    .min(max_backoff);
                let jittered = if backoff.is_zero() {
                    backoff
                } else {
                    let millis = backoff.as_millis().max(1) as u64;
                    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
                };
                tokio::time::sleep(jittered).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), Duration::from_millis(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, PipelineError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_up_to_bound() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), Duration::from_millis(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(PipelineError::upstream_rate_limit("429")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(5, Duration::from_millis(1), Duration::from_millis(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(PipelineError::input("bad brand")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
