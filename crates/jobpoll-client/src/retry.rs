use async_trait::async_trait;
use jobpoll_core::CancelToken;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Configures bounded retries with capped exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Base delay in milliseconds; the n-th retry waits `base * 2^n`.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after `failures` failed attempts: `min(base * 2^failures, cap)`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(failures));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Suspends the current task. Abstracted so tests can record delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
///
/// Errors the caller's predicate marks as retryable are retried after a
/// backoff sleep until the attempt budget is spent; the last error is then
/// returned. Any other error is returned at once, without sleeping.
#[derive(Debug, Clone)]
pub struct Retrier<S = TokioSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl Retrier<TokioSleeper> {
    /// A retrier that sleeps on the tokio timer.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, TokioSleeper)
    }
}

impl<S: Sleeper> Retrier<S> {
    /// A retrier with a custom sleeper.
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// The sleeper used for backoff delays.
    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, is_retryable: P, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        match self
            .run_cancellable(label, is_retryable, op, &CancelToken::never())
            .await
        {
            Some(result) => result,
            None => unreachable!("a token that is never cancelled fired"),
        }
    }

    /// Like [`Retrier::run`], but returns `None` as soon as `cancel` fires,
    /// whether an attempt is in flight or a backoff sleep is pending.
    pub async fn run_cancellable<T, E, F, Fut, P>(
        &self,
        label: &str,
        is_retryable: P,
        mut op: F,
        cancel: &CancelToken,
    ) -> Option<Result<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let outcome = tokio::select! {
                res = op() => res,
                _ = cancel.cancelled() => return None,
            };

            let err = match outcome {
                Ok(value) => return Some(Ok(value)),
                Err(e) => e,
            };
            failures += 1;

            if !is_retryable(&err) {
                warn!(op = label, attempt = failures, error = %err, "Non-retryable error");
                return Some(Err(err));
            }

            if failures >= max_attempts {
                warn!(
                    op = label,
                    attempts = failures,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Some(Err(err));
            }

            let delay = self.policy.backoff(failures);
            info!(
                op = label,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable error, backing off"
            );

            tokio::select! {
                _ = self.sleeper.sleep(delay) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }
}

/// Runs `op` under `policy`, sleeping on the tokio timer.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, is_retryable: P, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    Retrier::new(policy.clone()).run("retry", is_retryable, op).await
}

/// Like [`retry`], returning `None` once `cancel` fires.
pub async fn retry_cancellable<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    op: F,
    cancel: &CancelToken,
) -> Option<Result<T, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    Retrier::new(policy.clone())
        .run_cancellable("retry", is_retryable, op, cancel)
        .await
}

// ─── Tests ───────────────────────────────────────────────────────────────────
