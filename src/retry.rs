//! Retry with Exponential Backoff
//!
//! Resilient execution of async operations: transient failures are retried
//! with a doubling delay between attempts, non-retryable failures propagate
//! immediately, and a cancellation token can abort the loop mid-wait.

use crate::cancel::CancelToken;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for retry behavior
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Whether to spread delays by ±15% to avoid thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given retry budget
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Fast config for tests and low-latency operations
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: false,
        }
    }

    /// Config tuned for LLM API calls
    pub fn for_llm() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Builder: set max retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder: set base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Builder: set max delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Builder: set jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after failed attempt `attempt` (0-indexed):
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Trait for errors that can be retried
pub trait RetryableError: std::fmt::Display {
    /// Whether this error should trigger a retry
    fn is_retryable(&self) -> bool;

    /// Server-suggested retry delay, overriding the backoff schedule
    fn retry_delay_hint(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for std::io::Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        )
    }
}

/// Wrapper to make any error retryable
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct AlwaysRetryable<E: std::fmt::Display>(pub E);

impl<E: std::fmt::Display> RetryableError for AlwaysRetryable<E> {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Wrapper to make any error non-retryable
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NeverRetryable<E: std::fmt::Display>(pub E);

impl<E: std::fmt::Display> RetryableError for NeverRetryable<E> {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Error returned when the retry loop gives up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: E },

    #[error("non-retryable error: {0}")]
    NonRetryable(E),

    #[error("operation cancelled while waiting to retry")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Get the underlying operation error, if one was captured
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::RetriesExhausted { last_error, .. } => Some(last_error),
            RetryError::NonRetryable(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }

    /// Check if the retry budget was exhausted
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::RetriesExhausted { .. })
    }

    /// Number of attempts made, if the budget was exhausted
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// Executor that wraps operations with retry logic
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        self.run("operation", None, operation).await
    }

    /// Execute with a context name for logging
    pub async fn execute_with_context<F, Fut, T, E>(
        &self,
        context: &str,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        self.run(context, None, operation).await
    }

    /// Execute with a cancellation token that aborts the loop mid-wait
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        context: &str,
        cancel: &CancelToken,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        self.run(context, Some(cancel), operation).await
    }

    async fn run<F, Fut, T, E>(
        &self,
        context: &str,
        cancel: Option<&CancelToken>,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        // `attempt` counts completed failed attempts; the wait before retry
        // `i` is backoff_for_attempt(i), so an always-failing operation runs
        // max_retries + 1 times in total.
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            context = %context,
                            attempts = %(attempt + 1),
                            "Succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(RetryError::NonRetryable(e));
                    }

                    if attempt >= self.config.max_retries {
                        return Err(RetryError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: e,
                        });
                    }

                    let wait = if let Some(hint) = e.retry_delay_hint() {
                        hint
                    } else if self.config.jitter {
                        with_jitter(self.config.backoff_for_attempt(attempt))
                    } else {
                        self.config.backoff_for_attempt(attempt)
                    };

                    warn!(
                        context = %context,
                        attempt = %(attempt + 1),
                        max_retries = %self.config.max_retries,
                        error = %e,
                        wait_ms = %wait.as_millis(),
                        "Retry attempt failed, waiting before next try"
                    );

                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = sleep(wait) => {}
                                _ = token.cancelled() => {
                                    warn!(context = %context, "Retry loop cancelled during backoff wait");
                                    return Err(RetryError::Cancelled);
                                }
                            }
                        }
                        None => sleep(wait).await,
                    }

                    attempt += 1;
                }
            }
        }
    }
}

/// Spread a duration by ±15%
fn with_jitter(duration: Duration) -> Duration {
    let jitter_factor = 0.85 + (rand::random::<f64>() * 0.3);
    Duration::from_secs_f64(duration.as_secs_f64() * jitter_factor)
}

/// Helper function for one-off retries
pub async fn retry<F, Fut, T, E>(config: RetryConfig, operation: F) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    RetryExecutor::new(config).execute(operation).await
}

/// Helper for quick retries with default config
pub async fn retry_default<F, Fut, T, E>(operation: F) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    retry(RetryConfig::default(), operation).await
}
