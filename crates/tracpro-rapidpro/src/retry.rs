//! Retry with exponential back-off and jitter for the RapidPro client.
//!
//! [`retry_with_backoff`] wraps any fallible async operation and retries on
//! transient errors (network failures, 5xx). Application-level and
//! deserialization errors are returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::RapidProError;

/// Returns `true` for errors that are worth retrying after a back-off delay.
pub(crate) fn is_retriable(err: &RapidProError) -> bool {
    match err {
        RapidProError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        RapidProError::Client(_) | RapidProError::Deserialize { .. } => false,
    }
}

/// Runs `operation` with up to `max_retries` additional attempts on
/// transient errors. Delay doubles per attempt from `backoff_base_ms`,
/// jittered by ±25% and capped at 60s.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, RapidProError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RapidProError>>,
{
    const MAX_DELAY_MS: u64 = 60_000;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "RapidPro transient error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn deserialize_err() -> RapidProError {
        let src = serde_json::from_str::<()>("invalid").unwrap_err();
        RapidProError::Deserialize {
            context: "test".to_owned(),
            source: src,
        }
    }

    #[test]
    fn client_error_is_not_retriable() {
        assert!(!is_retriable(&RapidProError::Client("bad url".to_owned())));
    }

    #[test]
    fn deserialize_error_is_not_retriable() {
        assert!(!is_retriable(&deserialize_err()));
    }

    #[tokio::test]
    async fn non_retriable_error_fails_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(3, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(deserialize_err()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let result = retry_with_backoff(3, 1, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
