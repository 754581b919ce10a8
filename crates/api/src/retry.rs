use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result};

/// Bounds for retrying rate-limited (429) responses.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff: `initial_interval * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_interval
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Wait before re-issuing a rate-limited request. A usable `Retry-After`
    /// header wins over the computed backoff.
    pub fn wait_for(&self, headers: &HeaderMap, attempt: u32, now: DateTime<Utc>) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, now))
            .unwrap_or_else(|| self.backoff(attempt))
    }
}

/// Parses a `Retry-After` value given either as delay-seconds or as an
/// HTTP date (IMF-fixdate, RFC 850 or asctime). Dates in the past yield a
/// zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = parse_http_date(value)?;
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }

    // Obsolete forms recipients must still accept; both are always GMT.
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|at| at.and_utc())
}

/// Sleeps for `wait` unless `cancel` fires first.
pub async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}
