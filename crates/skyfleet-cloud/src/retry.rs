//! Bounded retry with a fixed wait between attempts
//!
//! Every provider call and SSH operation that may fail transiently runs
//! through [`run_with_retries`]. Errors are classified on the error type
//! itself (the [`Transience`] trait) rather than by inspecting library
//! namespaces, so a retry loop only ever re-drives failures the
//! transport layer has declared safe to re-drive.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Default wait between attempts.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Default attempt budget: retry for up to 5 minutes at the default wait.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Classification of an error as retryable or terminal.
///
/// Implemented by the error type of every operation handed to the retry
/// executor. Unlisted (non-transient) failures surface immediately
/// instead of being silently retried for five minutes.
pub trait Transience {
    fn is_transient(&self) -> bool;
}

/// Retry policy for a single call site.
///
/// Constructed per call site, never persisted. `max_attempts` bounds the
/// number of invocations; the wait is applied between attempts only, so
/// an operation runs at most `max_attempts` times and sleeps at most
/// `max_attempts - 1` times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub wait: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(wait: Duration, max_attempts: u32) -> Self {
        Self { wait, max_attempts }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait: DEFAULT_WAIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Why a retried operation did not produce a value.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The attempt budget ran out; carries the final underlying error.
    Exhausted { attempts: u32, source: E },

    /// A non-retryable error surfaced; propagated unchanged.
    Aborted(E),
}

impl<E> RetryError<E> {
    /// The underlying error, whichever way the loop ended.
    pub fn into_source(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Aborted(e) => e,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, source } => {
                write!(f, "gave up after {attempts} attempts: {source}")
            }
            RetryError::Aborted(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Aborted(e) => Some(e),
        }
    }
}

/// Run `op` until it succeeds, retrying transient errors up to the
/// policy's attempt budget.
///
/// A success on any attempt returns immediately. A non-transient error
/// aborts immediately without consuming the remaining budget. On
/// exhaustion the final error is returned wrapped in
/// [`RetryError::Exhausted`]; call sites map that onto their dedicated
/// failure kind.
pub async fn run_with_retries<T, E, F, Fut>(
    policy: &RetryPolicy,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transience + fmt::Display,
{
    retry_loop(policy, op, E::is_transient).await
}

/// Variant with no allow-list: every error is treated as retryable.
///
/// Matches call sites like post-create tagging, where the provider can
/// reject a freshly created resource with arbitrary errors until it has
/// indexed it.
pub async fn run_with_retries_all<T, E, F, Fut>(
    policy: &RetryPolicy,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry_loop(policy, op, |_| true).await
}

async fn retry_loop<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut attempts = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => {
                tracing::error!("unexpected error, not retrying: {e}");
                return Err(RetryError::Aborted(e));
            }
            Err(e) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    tracing::error!("giving up after {attempts} attempts: {e}");
                    return Err(RetryError::Exhausted {
                        attempts,
                        source: e,
                    });
                }
                tracing::info!(
                    "attempt {attempts}/{} failed: {e}; retrying in {:?}",
                    policy.max_attempts,
                    policy.wait
                );
                tokio::time::sleep(policy.wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FakeError {
        transient: bool,
        message: &'static str,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl Transience for FakeError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn transient(message: &'static str) -> FakeError {
        FakeError {
            transient: true,
            message,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 5);
        let calls = AtomicU32::new(0);

        let start = tokio::time::Instant::now();
        let result: Result<u32, RetryError<FakeError>> = run_with_retries(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_midway_and_stops_retrying() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 5);
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<FakeError>> = run_with_retries(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient("not yet"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        let calls = AtomicU32::new(0);

        let start = tokio::time::Instant::now();
        let result: Result<(), RetryError<FakeError>> = run_with_retries(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient("still broken")) }
        })
        .await;

        // 3 invocations, 2 sleeps
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "still broken");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_transient_error_aborts_immediately() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 30);
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<FakeError>> = run_with_retries(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeError {
                    transient: false,
                    message: "boom",
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), RetryError::Aborted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_all_retries_non_transient_errors_too() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 4);
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<FakeError>> = run_with_retries_all(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(FakeError {
                        transient: false,
                        message: "not indexed yet",
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
