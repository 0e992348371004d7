//! The throttled-retry policy.
//!
//! When a provider explicitly answers "too many requests", the fetch sleeps
//! once for a fixed backoff and tries exactly one more time. This is local to
//! a single fetch; there is no general retry framework and the worker pool
//! itself never retries.

use std::future::Future;
use std::time::Duration;

use http::StatusCode;

use crate::{ErrorKind, Result};

/// Default backoff before the single retry of a throttled fetch, 2 seconds.
pub const DEFAULT_THROTTLE_BACKOFF: Duration = Duration::from_secs(2);

/// An extension trait to decide whether a failure is worth the one retry.
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for StatusCode {
    fn should_retry(&self) -> bool {
        *self == StatusCode::TOO_MANY_REQUESTS
    }
}

impl RetryExt for ErrorKind {
    fn should_retry(&self) -> bool {
        match self {
            Self::ProviderThrottled { .. } => true,
            Self::RejectedStatusCode(status) => status.should_retry(),
            _ => false,
        }
    }
}

/// Run `fetch`, retrying it once after `backoff` if the provider throttled it.
///
/// If the retry is throttled as well, the failure is surfaced as a
/// network-class [`ErrorKind::Network`] error. Any other failure of either
/// attempt is returned unchanged.
///
/// # Errors
///
/// Returns the error of the last attempt.
///
/// # Examples
///
/// ```
/// use fetchgate_lib::{retry::retry_throttled, ErrorKind};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let result: Result<u8, _> =
///     retry_throttled(Duration::ZERO, || async { Err(ErrorKind::Decode("bad".into())) }).await;
/// assert_eq!(result, Err(ErrorKind::Decode("bad".into())));
/// # }
/// ```
pub async fn retry_throttled<T, F, Fut>(backoff: Duration, mut fetch: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match fetch().await {
        Err(e) if e.should_retry() => {
            log::warn!(
                "{e}, waiting {}ms before retrying once",
                backoff.as_millis()
            );
            tokio::time::sleep(backoff).await;
            fetch().await.map_err(|e| {
                if e.should_retry() {
                    ErrorKind::Network(format!("{e} (still throttled after retry)"))
                } else {
                    e
                }
            })
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn throttled() -> ErrorKind {
        ErrorKind::ProviderThrottled { retry_after: None }
    }

    /// A fetch function that fails with the given errors, in order, and
    /// succeeds once they are used up.
    fn scripted(
        failures: Vec<ErrorKind>,
    ) -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<Result<&'static str>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetch = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(failures.get(n).cloned().map_or(Ok("payload"), Err))
        };
        (calls, fetch)
    }

    #[test]
    fn test_should_retry() {
        assert!(StatusCode::TOO_MANY_REQUESTS.should_retry());
        assert!(!StatusCode::SERVICE_UNAVAILABLE.should_retry());
        assert!(throttled().should_retry());
        assert!(ErrorKind::RejectedStatusCode(StatusCode::TOO_MANY_REQUESTS).should_retry());
        assert!(!ErrorKind::Timeout(Duration::from_secs(1)).should_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_needs_one_call() {
        let (calls, fetch) = scripted(vec![]);
        let start = Instant::now();

        assert_eq!(retry_throttled(DEFAULT_THROTTLE_BACKOFF, fetch).await, Ok("payload"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_then_success() {
        let (calls, fetch) = scripted(vec![throttled()]);
        let start = Instant::now();

        assert_eq!(retry_throttled(DEFAULT_THROTTLE_BACKOFF, fetch).await, Ok("payload"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= DEFAULT_THROTTLE_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_twice_becomes_network_error() {
        let (calls, fetch) = scripted(vec![throttled(), throttled(), throttled()]);

        let err = retry_throttled(DEFAULT_THROTTLE_BACKOFF, fetch).await.unwrap_err();
        assert!(err.is_network(), "{err:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let (calls, fetch) = scripted(vec![ErrorKind::Network("connection refused".into())]);

        let err = retry_throttled(DEFAULT_THROTTLE_BACKOFF, fetch).await.unwrap_err();
        assert_eq!(err, ErrorKind::Network("connection refused".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_error_is_returned_unchanged() {
        let (_, fetch) = scripted(vec![throttled(), ErrorKind::Decode("truncated".into())]);

        let err = retry_throttled(DEFAULT_THROTTLE_BACKOFF, fetch).await.unwrap_err();
        assert_eq!(err, ErrorKind::Decode("truncated".into()));
    }
}
