//! Remote provider error types and their retry classification.
//!
//! Every provider call returns an [`ScmError`] whose [`ScmErrorKind`] says
//! whether the provider throttled us, and if so what it told us about when to
//! come back:
//!
//! - **Primary rate limit**: the hourly quota is exhausted; the provider
//!   supplies the instant the quota resets.
//! - **Secondary rate limit**: abuse detection; the provider may supply a
//!   `Retry-After` cooldown.
//! - **Other**: permission denied, not found, validation failures and so on.
//!   Never retried.
//!
//! [`classify`] turns an error into a retry decision without touching the
//! network, so the retry loop has no provider-specific logic in it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// What kind of failure a provider call hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScmErrorKind {
    /// The remaining-quota counter is exhausted until `reset`.
    PrimaryRateLimit { reset: DateTime<Utc> },

    /// Abuse detection tripped. `retry_after` is the provider's hint, if any.
    SecondaryRateLimit { retry_after: Option<Duration> },

    /// Any other failure.
    Other,
}

/// An error from the remote provider.
#[derive(Debug, Clone, Error)]
pub struct ScmError {
    pub kind: ScmErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,
}

impl fmt::Display for ScmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "provider error (HTTP {}): {}", code, self.message),
            None => write!(f, "provider error: {}", self.message),
        }
    }
}

impl ScmError {
    /// A primary rate limit resetting at `reset`.
    pub fn primary_rate_limit(reset: DateTime<Utc>) -> Self {
        Self {
            kind: ScmErrorKind::PrimaryRateLimit { reset },
            status_code: Some(403),
            message: format!("API rate limit exceeded, resets at {}", reset),
        }
    }

    /// A secondary rate limit with an optional cooldown hint.
    pub fn secondary_rate_limit(retry_after: Option<Duration>) -> Self {
        Self {
            kind: ScmErrorKind::SecondaryRateLimit { retry_after },
            status_code: Some(403),
            message: "secondary rate limit exceeded".to_string(),
        }
    }

    /// A non-throttling failure.
    pub fn other(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ScmErrorKind::Other,
            status_code,
            message: message.into(),
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        !matches!(self.kind, ScmErrorKind::Other)
    }
}

/// Retry decision for one failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Retry after waiting. `None` means the provider gave no hint.
    Retryable { wait_hint: Option<Duration> },

    /// Do not retry.
    Fatal,
}

/// Classifies `err` relative to `now`.
///
/// For a primary limit the hint is the time remaining until reset; a reset in
/// the past yields a zero hint.
pub fn classify(err: &ScmError, now: DateTime<Utc>) -> Classification {
    match &err.kind {
        ScmErrorKind::PrimaryRateLimit { reset } => {
            let remaining = (*reset - now).to_std().unwrap_or(Duration::ZERO);
            Classification::Retryable {
                wait_hint: Some(remaining),
            }
        }
        ScmErrorKind::SecondaryRateLimit { retry_after } => Classification::Retryable {
            wait_hint: *retry_after,
        },
        ScmErrorKind::Other => Classification::Fatal,
    }
}

/// Builds an [`ScmError`] from a failed HTTP exchange.
///
/// `remaining` is `X-RateLimit-Remaining`, `reset_epoch` is `X-RateLimit-Reset`
/// (seconds since the epoch) and `retry_after` is `Retry-After` in seconds.
pub fn from_response(
    status: u16,
    message: &str,
    remaining: Option<u64>,
    reset_epoch: Option<i64>,
    retry_after: Option<u64>,
) -> ScmError {
    let throttled = status == 403 || status == 429;

    if throttled && is_secondary_rate_limit(message) {
        return ScmError {
            kind: ScmErrorKind::SecondaryRateLimit {
                retry_after: retry_after.map(Duration::from_secs),
            },
            status_code: Some(status),
            message: message.to_string(),
        };
    }

    if throttled && (remaining == Some(0) || is_rate_limit_error(message)) {
        if let Some(reset) = reset_epoch.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)) {
            return ScmError {
                kind: ScmErrorKind::PrimaryRateLimit { reset },
                status_code: Some(status),
                message: message.to_string(),
            };
        }
        // Throttled without a reset time: treat as a cooldown with no hint.
        return ScmError {
            kind: ScmErrorKind::SecondaryRateLimit {
                retry_after: retry_after.map(Duration::from_secs),
            },
            status_code: Some(status),
            message: message.to_string(),
        };
    }

    ScmError::other(Some(status), message)
}

/// Checks if an error message indicates a rate limit.
pub(crate) fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || is_secondary_rate_limit(message)
}

/// Checks if an error message indicates the secondary (abuse) limit.
pub(crate) fn is_secondary_rate_limit(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("secondary rate") || message_lower.contains("abuse detection")
}
