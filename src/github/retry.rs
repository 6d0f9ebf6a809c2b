//! # Rate Limit Retry
//!
//! Bounded retry with exponential backoff and jitter for GitHub API calls
//! that answer 403 or 429. The schedule honours the `Retry-After` response
//! header: sleep `retry_after * 2^attempt` plus up to 500ms of jitter,
//! for at most [`MAX_ATTEMPTS`] requests.

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Maximum number of requests before a rate-limited call gives up
pub const MAX_ATTEMPTS: u32 = 5;

/// Fallback when `Retry-After` is absent or unparseable
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Whether a status code is a GitHub rate limit response
pub fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS
}

/// Seconds to wait as advertised by the `Retry-After` header
pub fn retry_after_seconds(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// The deterministic part of the backoff schedule: `retry_after * 2^attempt`
pub fn backoff_base(retry_after_secs: u64, attempt: u32) -> Duration {
    Duration::from_secs(retry_after_secs.saturating_mul(1u64 << attempt))
}

fn backoff_with_jitter(retry_after_secs: u64, attempt: u32) -> Duration {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500u64));
    backoff_base(retry_after_secs, attempt) + jitter
}

/// Send a request, retrying on 403/429 per the backoff schedule.
///
/// Returns the first non-rate-limited response, or the transport error from
/// the failing send. Exhausting all attempts yields the final rate-limited
/// response so the caller decides how to surface it.
pub async fn send_with_rate_limit_retry<F, Fut>(
    operation: &str,
    mut send: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = send().await?;
        if !is_rate_limited(response.status()) || attempt + 1 >= MAX_ATTEMPTS {
            return Ok(response);
        }

        let retry_after = retry_after_seconds(response.headers());
        let delay = backoff_with_jitter(retry_after, attempt);
        warn!(
            "{operation}: GitHub answered {}, retrying in {:.1}s (attempt {}/{})",
            response.status(),
            delay.as_secs_f64(),
            attempt + 1,
            MAX_ATTEMPTS
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_base(2, 0), Duration::from_secs(2));
        assert_eq!(backoff_base(2, 1), Duration::from_secs(4));
        assert_eq!(backoff_base(2, 2), Duration::from_secs(8));
        assert_eq!(backoff_base(2, 3), Duration::from_secs(16));
        assert_eq!(backoff_base(2, 4), Duration::from_secs(32));
    }

    #[test]
    fn backoff_with_default_retry_after() {
        assert_eq!(backoff_base(1, 0), Duration::from_secs(1));
        assert_eq!(backoff_base(1, 4), Duration::from_secs(16));
    }

    #[test]
    fn retry_after_header_is_parsed_as_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after_seconds(&headers), 7);
    }

    #[test]
    fn missing_retry_after_defaults_to_one_second() {
        assert_eq!(retry_after_seconds(&HeaderMap::new()), 1);
    }

    #[test]
    fn unparseable_retry_after_defaults_to_one_second() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(retry_after_seconds(&headers), 1);
    }

    #[test]
    fn rate_limit_statuses() {
        assert!(is_rate_limited(StatusCode::FORBIDDEN));
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_rate_limited(StatusCode::OK));
        assert!(!is_rate_limited(StatusCode::CREATED));
        assert!(!is_rate_limited(StatusCode::UNAUTHORIZED));
    }
}
