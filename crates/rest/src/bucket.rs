//! Rate-bucket state and response-header parsing.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio::time::Instant;

// Response header names (matched case-insensitively by HeaderMap).
const H_BUCKET: &str = "x-ratelimit-bucket";
const H_LIMIT: &str = "x-ratelimit-limit";
const H_REMAINING: &str = "x-ratelimit-remaining";
const H_RESET: &str = "x-ratelimit-reset";
const H_RESET_AFTER: &str = "x-ratelimit-reset-after";
const H_GLOBAL: &str = "x-ratelimit-global";
const H_SCOPE: &str = "x-ratelimit-scope";
const H_RETRY_AFTER: &str = "retry-after";

/// Live quota state for one bucket key.
///
/// `remaining` only moves down between resets (optimistic local decrements,
/// corrected upward only by a server observation); once `reset_at` passes
/// the bucket is logically fresh.
#[derive(Debug, Clone)]
pub struct RateBucket {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Instant,
}

impl RateBucket {
    /// A bucket the server has never described: effectively unlimited until
    /// the first observation arrives.
    pub fn unknown(now: Instant) -> Self {
        Self {
            limit: 1,
            remaining: 1,
            reset_at: now,
        }
    }

    /// Quota exhausted and the reset is still ahead.
    pub fn is_blocked(&self, now: Instant) -> bool {
        self.remaining == 0 && now < self.reset_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// Which scope a 429 was issued under. `Shared` limits are expected and
/// benign — they never count toward ban-risk accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    User,
    Global,
    Shared,
}

impl RateLimitScope {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "global" => Some(Self::Global),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// Everything rate-limit-relevant observed on one response.
#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    /// Server-assigned bucket identifier for this route, if any.
    pub bucket: Option<String>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Absolute reset time (epoch seconds, fractional).
    pub reset: Option<DateTime<Utc>>,
    /// Relative reset (seconds, fractional) — preferred over `reset`
    /// because it is immune to local clock drift.
    pub reset_after: Option<f64>,
    pub global: bool,
    pub scope: Option<RateLimitScope>,
    /// `Retry-After` header, seconds.
    pub retry_after: Option<f64>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        Self {
            bucket: get(H_BUCKET).map(str::to_owned),
            limit: get(H_LIMIT).and_then(|v| v.parse().ok()),
            remaining: get(H_REMAINING).and_then(|v| v.parse().ok()),
            reset: get(H_RESET)
                .and_then(|v| v.parse::<f64>().ok())
                .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single()),
            reset_after: get(H_RESET_AFTER).and_then(|v| v.parse().ok()),
            global: get(H_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: get(H_SCOPE).and_then(RateLimitScope::parse),
            retry_after: get(H_RETRY_AFTER).and_then(|v| v.parse().ok()),
        }
    }

    /// Whether the response described the bucket fully enough to store.
    pub fn describes_bucket(&self) -> bool {
        self.bucket.is_some() && self.limit.is_some() && self.remaining.is_some()
    }

    /// How long until this bucket resets, relative to now.
    pub fn reset_delay(&self) -> Option<Duration> {
        if let Some(after) = self.reset_after {
            return Some(Duration::from_secs_f64(after.max(0.0)));
        }
        let reset = self.reset?;
        let ms = (reset - Utc::now()).num_milliseconds().max(0);
        Some(Duration::from_millis(ms as u64))
    }
}

/// Body of a 429 response.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub message: String,
    /// Seconds until the limit clears.
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub code: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                k.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn parses_full_header_set() {
        let info = RateLimitInfo::from_headers(&headers(&[
            ("x-ratelimit-bucket", "abcd1234"),
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "3"),
            ("x-ratelimit-reset", "1470173023.123"),
            ("x-ratelimit-reset-after", "2.5"),
            ("x-ratelimit-scope", "user"),
        ]));
        assert_eq!(info.bucket.as_deref(), Some("abcd1234"));
        assert_eq!(info.limit, Some(5));
        assert_eq!(info.remaining, Some(3));
        assert_eq!(info.reset_after, Some(2.5));
        assert_eq!(info.scope, Some(RateLimitScope::User));
        assert!(!info.global);
        assert!(info.describes_bucket());
        // reset-after wins over the absolute timestamp
        let delay = info.reset_delay().unwrap();
        assert_eq!(delay, Duration::from_secs_f64(2.5));
    }

    #[test]
    fn missing_headers_mean_no_bucket() {
        let info = RateLimitInfo::from_headers(&headers(&[("content-type", "application/json")]));
        assert!(!info.describes_bucket());
        assert!(info.reset_delay().is_none());
    }

    #[test]
    fn global_flag_and_retry_after() {
        let info = RateLimitInfo::from_headers(&headers(&[
            ("x-ratelimit-global", "true"),
            ("retry-after", "1.2"),
        ]));
        assert!(info.global);
        assert_eq!(info.retry_after, Some(1.2));
    }

    #[test]
    fn rate_limit_body_parses() {
        let body: RateLimitBody = serde_json::from_str(
            r#"{"message":"You are being rate limited.","retry_after":1.2,"global":true}"#,
        )
        .unwrap();
        assert_eq!(body.retry_after, 1.2);
        assert!(body.global);
        assert_eq!(body.code, None);
    }
}
