//! Generic retry/timeout combinator used for every remote boundary.
//!
//! `retries = N` means the task is attempted up to N + 1 times with a fixed
//! delay in between. A per-attempt timeout abandons the pending attempt (its
//! result is discarded); a total timeout caps the whole retry loop.

use crate::constants::{DEFAULT_RETRY_DELAY, EVM_PROVIDER_TIMEOUT};
use std::future::Future;
use std::panic::{catch_unwind, UnwindSafe};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct GoOptions {
    pub retries: u32,
    pub delay: Option<Duration>,
    pub total_timeout: Option<Duration>,
    pub attempt_timeout: Option<Duration>,
}

impl GoOptions {
    /// Options used for chain provider calls: one retry, short fixed delay,
    /// bounded per attempt.
    pub fn provider() -> Self {
        Self {
            retries: 1,
            delay: Some(DEFAULT_RETRY_DELAY),
            total_timeout: None,
            attempt_timeout: Some(EVM_PROVIDER_TIMEOUT),
        }
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GoError<E> {
    #[error("operation timed out")]
    Timeout,
    #[error("task panicked: {0}")]
    Panic(String),
    #[error("{0}")]
    Inner(E),
}

impl<E> GoError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            GoError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Runs `task`, retrying on failure, and converts the outcome into a tagged
/// result. The last error wins when all attempts fail.
pub async fn go<T, E, F, Fut>(task: F, options: GoOptions) -> Result<T, GoError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    go_if(task, options, |_| true).await
}

/// Like [`go`], but gives up immediately when `should_retry` rejects the
/// error. Timeouts are always retried.
pub async fn go_if<T, E, F, Fut, P>(task: F, options: GoOptions, should_retry: P) -> Result<T, GoError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = run_attempts(task, &options, should_retry);
    match options.total_timeout {
        Some(limit) => match tokio::time::timeout(limit, attempts).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GoError::Timeout),
        },
        None => attempts.await,
    }
}

async fn run_attempts<T, E, F, Fut, P>(task: F, options: &GoOptions, should_retry: P) -> Result<T, GoError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut last_error = None;
    for attempt in 0..=options.retries {
        if attempt > 0 {
            if let Some(delay) = options.delay {
                tokio::time::sleep(delay).await;
            }
        }
        let outcome = match options.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, task()).await {
                Ok(result) => result.map_err(GoError::Inner),
                Err(_) => Err(GoError::Timeout),
            },
            None => task().await.map_err(GoError::Inner),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(GoError::Inner(error)) if !should_retry(&error) => {
                tracing::debug!(attempt, "task failed with a non-retryable error");
                return Err(GoError::Inner(error));
            }
            Err(error) => {
                tracing::debug!(attempt, "retryable task attempt failed");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or(GoError::Timeout))
}

/// Synchronous variant: captures panics, no timeout machinery.
pub fn go_sync<T, E, F>(task: F) -> Result<T, GoError<E>>
where
    F: FnOnce() -> Result<T, E> + UnwindSafe,
{
    match catch_unwind(task) {
        Ok(result) => result.map_err(GoError::Inner),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(GoError::Panic(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn succeeds_first_attempt_without_retrying() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, GoError<TestError>> = go(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(7)
            },
            GoOptions { retries: 3, ..Default::default() },
        )
        .await;
        assert_matches!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, GoError<TestError>> = go(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError("still broken"))
            },
            GoOptions { retries: 2, delay: Some(Duration::from_millis(50)), ..Default::default() },
        )
        .await;
        assert_matches!(result, Err(GoError::Inner(TestError("still broken"))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, GoError<TestError>> = go(
            || async {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(TestError("transient"))
                } else {
                    Ok(42)
                }
            },
            GoOptions { retries: 2, delay: Some(Duration::from_millis(10)), ..Default::default() },
        )
        .await;
        assert_matches!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_abandons_the_pending_attempt() {
        let result: Result<u32, GoError<TestError>> = go(
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            },
            GoOptions { retries: 0, attempt_timeout: Some(Duration::from_millis(100)), ..Default::default() },
        )
        .await;
        assert_matches!(result, Err(GoError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn total_timeout_caps_the_whole_loop() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, GoError<TestError>> = go(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                Err(TestError("slow failure"))
            },
            GoOptions {
                retries: 100,
                delay: Some(Duration::from_millis(10)),
                total_timeout: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        )
        .await;
        assert_matches!(result, Err(GoError::Timeout));
        assert!(calls.load(Ordering::SeqCst) < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn a_rejected_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, GoError<TestError>> = go_if(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError("deterministic"))
            },
            GoOptions { retries: 5, delay: Some(Duration::from_millis(10)), ..Default::default() },
            |error: &TestError| error.0 != "deterministic",
        )
        .await;
        assert_matches!(result, Err(GoError::Inner(TestError("deterministic"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn go_sync_passes_through_results() {
        let result: Result<u32, GoError<TestError>> = go_sync(|| Ok(5));
        assert_matches!(result, Ok(5));
        let result: Result<u32, GoError<TestError>> = go_sync(|| Err(TestError("nope")));
        assert_matches!(result, Err(GoError::Inner(TestError("nope"))));
    }

    #[test]
    fn go_sync_captures_panics() {
        let result: Result<u32, GoError<TestError>> = go_sync(|| panic!("boom"));
        assert_matches!(result, Err(GoError::Panic(message)) if message == "boom");
    }
}
