//! Client-Side Resilience for Hosted LLM APIs
//!
//! This crate provides the two guard rails every API consumer ends up
//! writing by hand:
//!
//! - **Rate Limiting**: keyed sliding-window admission control, bounding each
//!   identity to at most N calls per rolling window
//! - **Retry**: automatic retries of transient failures with exponential
//!   backoff and cooperative cancellation
//!
//! # Example
//!
//! ```rust,ignore
//! use llm_resilience::{
//!     GuardedExecutor, RateLimitConfig, RetryConfig, SlidingWindowLimiter,
//! };
//! use std::sync::Arc;
//!
//! // Per-user admission: 60 calls per rolling minute
//! let limiter = Arc::new(SlidingWindowLimiter::new(RateLimitConfig::anthropic_tier1()));
//!
//! // Admit, then call with retry
//! let executor = GuardedExecutor::new(Some(limiter), RetryConfig::for_llm());
//! let reply = executor.execute("user-42", || call_llm_api()).await?;
//! ```

pub mod cancel;
pub mod rate_limit;
pub mod retry;

pub use cancel::CancelToken;
pub use rate_limit::{RateLimitConfig, SlidingWindowLimiter};
pub use retry::{
    retry, retry_default, AlwaysRetryable, NeverRetryable, RetryConfig, RetryError, RetryExecutor,
    RetryableError,
};

use std::sync::Arc;

/// Combined wrapper: rate-limit admission followed by retry with backoff.
///
/// The limiter decides whether the call may start at all; the retry executor
/// then handles transient failures of the call itself. Either leg is
/// optional.
pub struct GuardedExecutor {
    limiter: Option<Arc<SlidingWindowLimiter<String>>>,
    retry_config: RetryConfig,
}

impl GuardedExecutor {
    /// Create a new guarded executor
    pub fn new(limiter: Option<Arc<SlidingWindowLimiter<String>>>, retry_config: RetryConfig) -> Self {
        Self {
            limiter,
            retry_config,
        }
    }

    /// Create with just retry, no admission control
    pub fn with_retry(retry_config: RetryConfig) -> Self {
        Self {
            limiter: None,
            retry_config,
        }
    }

    /// Create for LLM calls with sensible defaults
    pub fn for_llm() -> Self {
        Self {
            limiter: Some(Arc::new(SlidingWindowLimiter::new(
                RateLimitConfig::conservative(),
            ))),
            retry_config: RetryConfig::for_llm(),
        }
    }

    /// The admission limiter, if one is configured
    pub fn limiter(&self) -> Option<&Arc<SlidingWindowLimiter<String>>> {
        self.limiter.as_ref()
    }

    /// Execute an operation for `identity` behind both guards
    pub async fn execute<F, Fut, T, E>(&self, identity: &str, operation: F) -> Result<T, GuardError<E>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        if let Some(ref limiter) = self.limiter {
            if !limiter.is_allowed(identity.to_string()) {
                return Err(GuardError::RateLimited);
            }
        }

        RetryExecutor::new(self.retry_config.clone())
            .execute_with_context(identity, operation)
            .await
            .map_err(GuardError::from)
    }

    /// Execute behind both guards with a cancellation token
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        identity: &str,
        cancel: &CancelToken,
        operation: F,
    ) -> Result<T, GuardError<E>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        if let Some(ref limiter) = self.limiter {
            if !limiter.is_allowed(identity.to_string()) {
                return Err(GuardError::RateLimited);
            }
        }

        RetryExecutor::new(self.retry_config.clone())
            .execute_cancellable(identity, cancel, operation)
            .await
            .map_err(GuardError::from)
    }
}

/// Combined error type for guarded execution.
///
/// The `RateLimited` message is deliberately generic: it is safe to show to
/// end users without leaking internal limits or state.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    #[error("rate limit exceeded, please try again later")]
    RateLimited,

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: E },

    #[error("non-retryable error: {0}")]
    NonRetryable(E),

    #[error("operation cancelled")]
    Cancelled,
}

impl<E> From<RetryError<E>> for GuardError<E> {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::RetriesExhausted {
                attempts,
                last_error,
            } => GuardError::RetriesExhausted {
                attempts,
                last_error,
            },
            RetryError::NonRetryable(e) => GuardError::NonRetryable(e),
            RetryError::Cancelled => GuardError::Cancelled,
        }
    }
}
