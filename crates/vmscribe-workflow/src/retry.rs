//! Retry combinator and the policies for each external call class.
//!
//! A [`RetryPolicy`] is a failure classifier, a delay function and a retry
//! ceiling. `execute` runs an operation once and repeats it up to
//! `max_retries` more times while the classifier matches, waiting on the
//! injected [`Clock`] between attempts. Cancellation is never retried and
//! interrupts a pending wait.

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::warn;
use vmscribe_core::{Clock, CoreError, CorrelationId};

use crate::error::{GatewayError, Result};

/// Default number of retries after the initial call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base of the fallback delay for rate-limited calls, in seconds.
const RATE_LIMIT_BASE_SECONDS: u64 = 30;

/// Decides whether a failure should be retried.
pub type Classifier = fn(&GatewayError) -> bool;

/// Computes the wait before retry number `attempt` (1-based).
pub type DelayFn = fn(u32, &GatewayError) -> Duration;

/// Retry policy for one class of external calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: &'static str,
    max_retries: u32,
    classifier: Classifier,
    delay: DelayFn,
}

impl RetryPolicy {
    /// Creates a policy from its parts.
    pub fn new(name: &'static str, max_retries: u32, classifier: Classifier, delay: DelayFn) -> Self {
        Self { name, max_retries, classifier, delay }
    }

    /// Policy for message-store API calls.
    ///
    /// Retries server errors, request timeouts, connection failures and
    /// rate limits. Rate-limited calls honour the server's guidance.
    pub fn api() -> Self {
        Self::new("api", DEFAULT_MAX_RETRIES, is_transient_api_failure, api_delay)
    }

    /// Policy for database calls.
    ///
    /// Retries transient SQLSTATEs and, as a catch-all, any other database
    /// failure. Constraint, lookup and input failures are not retried.
    pub fn database() -> Self {
        Self::new("database", DEFAULT_MAX_RETRIES, is_retryable_store_failure, exponential_delay)
    }

    /// Policy for file store uploads. Retries every transfer failure.
    pub fn file() -> Self {
        Self::new("file", DEFAULT_MAX_RETRIES, is_transfer_failure, exponential_delay)
    }

    /// Returns the policy with a different retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Policy name used in log fields.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of retries after the initial call.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns true if the policy would retry this failure.
    pub fn should_retry(&self, error: &GatewayError) -> bool {
        !error.is_cancelled() && (self.classifier)(error)
    }

    /// Wait before retry number `attempt`.
    pub fn delay_for(&self, attempt: u32, error: &GatewayError) -> Duration {
        (self.delay)(attempt, error)
    }

    /// Runs `operation` under this policy.
    ///
    /// # Errors
    ///
    /// Returns the first failure the classifier does not match, the last
    /// failure once retries are exhausted, or `GatewayError::Cancelled`.
    pub async fn execute<T, F, Fut>(
        &self,
        clock: &dyn Clock,
        cancellation: &CancellationToken,
        correlation_id: &CorrelationId,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            if cancellation.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                () = cancellation.cancelled() => Err(GatewayError::Cancelled),
                result = operation() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.max_retries || !self.should_retry(&error) {
                return Err(error);
            }

            attempt += 1;
            let delay = self.delay_for(attempt, &error);

            warn!(
                policy = self.name,
                correlation_id = %correlation_id,
                attempt,
                delay_secs = delay.as_secs_f64(),
                category = %error.category(),
                transient = error.is_transient(),
                error = %error,
                "retrying after failure"
            );

            tokio::select! {
                biased;
                () = cancellation.cancelled() => return Err(GatewayError::Cancelled),
                () = clock.sleep(delay) => {},
            }
        }
    }
}

/// Set of policies handed to the workflow.
#[derive(Debug, Clone)]
pub struct RetryPolicies {
    /// Message-store API calls.
    pub api: RetryPolicy,
    /// Database calls.
    pub database: RetryPolicy,
    /// File store uploads.
    pub file: RetryPolicy,
}

impl RetryPolicies {
    /// Creates the standard policies with a shared retry ceiling.
    pub fn new(max_retries: u32) -> Self {
        Self {
            api: RetryPolicy::api().with_max_retries(max_retries),
            database: RetryPolicy::database().with_max_retries(max_retries),
            file: RetryPolicy::file().with_max_retries(max_retries),
        }
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

fn is_transient_api_failure(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::Api { .. } | GatewayError::Network { .. } | GatewayError::Timeout { .. }
    ) && error.is_transient()
}

fn is_retryable_store_failure(error: &GatewayError) -> bool {
    match error {
        GatewayError::Store(_) if error.is_transient() => true,
        GatewayError::Store(CoreError::Database { .. }) => true,
        _ => false,
    }
}

fn is_transfer_failure(error: &GatewayError) -> bool {
    matches!(error, GatewayError::Transfer { .. })
}

/// `2^attempt` seconds.
fn exponential_delay(attempt: u32, _error: &GatewayError) -> Duration {
    Duration::from_secs(2_u64.saturating_pow(attempt))
}

/// Rate-limit aware delay.
///
/// For 429 the order is `Retry-After`, then the rate-limit window when no
/// requests remain, then `30 * 2^attempt` seconds. Other failures wait
/// `2^attempt` seconds.
fn api_delay(attempt: u32, error: &GatewayError) -> Duration {
    match error {
        GatewayError::Api {
            status_code: 429,
            retry_after,
            rate_limit_remaining,
            rate_limit_window,
            ..
        } => {
            if let Some(seconds) = retry_after {
                return Duration::from_secs(*seconds);
            }
            if let (Some(0), Some(window)) = (rate_limit_remaining, rate_limit_window) {
                return Duration::from_secs(*window);
            }
            Duration::from_secs(RATE_LIMIT_BASE_SECONDS.saturating_mul(2_u64.saturating_pow(attempt)))
        },
        _ => exponential_delay(attempt, error),
    }
}
