//! Failure classification and wait computation for GraphQL requests.
//!
//! Everything here is pure: the request loop in `github_graphql` asks
//! [`RetryPolicy::delay_for`] how long to wait after a failed attempt and
//! performs the sleep itself.

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

const SECONDARY_RATE_LIMIT_MARKER: &str = "secondary rate limit";

/// Why a single request attempt did not yield usable data.
#[derive(Debug, Error)]
pub enum AttemptFailure {
    #[error("rate limited, waiting {wait:?}")]
    RateLimited { wait: Duration },

    #[error("transient HTTP {0}")]
    Transient(StatusCode),

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("network error: {0}")]
    Network(reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("GraphQL errors: {0}")]
    GraphQl(String),
}

// The message already carries the reqwest error; it is not exposed as `source()`.
impl From<reqwest::Error> for AttemptFailure {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total HTTP calls allowed, rate-limit waits included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub rate_limit_margin: Duration,
    pub rate_limit_fallback: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(1200),
            rate_limit_margin: Duration::from_secs(2),
            rate_limit_fallback: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt` (zero-based).
    pub fn delay_for(&self, failure: &AttemptFailure, attempt: u32) -> Duration {
        match failure {
            AttemptFailure::RateLimited { wait } => *wait,
            _ => backoff_delay(attempt, self.base_delay) + jitter(self.max_jitter),
        }
    }
}

/// `base * 2^attempt`, saturating instead of overflowing.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::rng().random_range(0.0..=max.as_secs_f64()))
}

/// True when a 403 carries an exhausted primary quota.
pub fn is_quota_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get(RATE_LIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

/// Time until the quota resets plus `margin`, never negative.
/// Falls back to `fallback` when the reset header is missing or unreadable.
pub fn rate_limit_wait(
    headers: &HeaderMap,
    now: DateTime<Utc>,
    margin: Duration,
    fallback: Duration,
) -> Duration {
    let reset = headers
        .get(RATE_LIMIT_RESET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());

    match reset {
        Some(reset) => {
            let remaining = reset.saturating_sub(now.timestamp()).max(0);
            Duration::from_secs(remaining as u64) + margin
        }
        None => fallback,
    }
}

/// Classify a non-200 response.
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> AttemptFailure {
    if status == StatusCode::FORBIDDEN && is_quota_exhausted(headers) {
        let wait = rate_limit_wait(
            headers,
            now,
            policy.rate_limit_margin,
            policy.rate_limit_fallback,
        );
        return AttemptFailure::RateLimited { wait };
    }

    let secondary = status == StatusCode::FORBIDDEN
        && body.to_ascii_lowercase().contains(SECONDARY_RATE_LIMIT_MARKER);

    if secondary
        || matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        )
    {
        return AttemptFailure::Transient(status);
    }

    AttemptFailure::Http {
        status,
        body: body.chars().take(200).collect(),
    }
}
