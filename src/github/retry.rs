//! Rate-limit-aware retry for provider calls.
//!
//! Unlike a blind exponential backoff, the wait between attempts comes from
//! the provider: until the quota reset for a primary rate limit, the
//! `Retry-After` cooldown for a secondary one. Anything else fails at once.
//!
//! Guarantees:
//! - at most `max_attempts` invocations of the operation
//! - a [`Classification::Fatal`] error is never retried
//! - every wait is clamped to `max_wait`, bounding total delay

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use super::error::{Classification, ScmError, classify};

/// Configuration for [`retry_remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of invocations, including the first.
    pub max_attempts: u32,

    /// Upper bound on any single wait.
    pub max_wait: Duration,

    /// Wait used when the provider throttles without saying for how long.
    pub secondary_floor: Duration,

    /// Added to provider hints so we don't arrive a hair early.
    pub margin: Duration,
}

impl RetryConfig {
    /// Three attempts, waits clamped to ten minutes.
    pub const DEFAULT: Self = Self {
        max_attempts: 3,
        max_wait: Duration::from_secs(10 * 60),
        secondary_floor: Duration::from_secs(60),
        margin: Duration::from_secs(1),
    };

    /// Returns a copy with a different attempt budget.
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// Computes how long to sleep for a retryable failure with `wait_hint`.
    pub fn wait_for(&self, wait_hint: Option<Duration>) -> Duration {
        let wait = match wait_hint {
            Some(hint) => hint.saturating_add(self.margin),
            None => self.secondary_floor,
        };
        wait.min(self.max_wait)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Why [`retry_remote`] gave up.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Still rate limited after spending the whole attempt budget.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: ScmError },

    /// A non-retryable failure.
    #[error(transparent)]
    Fatal(ScmError),
}

impl RetryError {
    /// Returns the last provider error seen.
    pub fn last_error(&self) -> &ScmError {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Fatal(e) => e,
        }
    }
}

/// Executes `operation` until it succeeds, fails fatally, or the attempt
/// budget is spent.
///
/// `operation` must be idempotent; it may be invoked up to
/// `config.max_attempts` times. A budget of zero is treated as one.
pub async fn retry_remote<T, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScmError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let wait_hint = match classify(&err, Utc::now()) {
            Classification::Fatal => {
                debug!(attempt, error = %err, "Provider call failed, not retryable");
                return Err(RetryError::Fatal(err));
            }
            Classification::Retryable { wait_hint } => wait_hint,
        };

        if attempt >= max_attempts {
            warn!(attempt, error = %err, "Provider call still rate limited, giving up");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: err,
            });
        }

        let wait = config.wait_for(wait_hint);
        warn!(
            attempt,
            wait_secs = wait.as_secs_f64(),
            error = %err,
            "Provider call rate limited, backing off"
        );
        tokio::time::sleep(wait).await;
    }
}
