//! Per-provider sliding-window rate limiter (C1).
//!
//! Non-blocking by design: `check` never sleeps. When a bucket runs low it
//! flips to a rate-limited state, spawns a countdown task to clear it, and
//! hands the caller an error so the worker can transition itself to `paused`
//! instead of hanging.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub window_s: i64,
    pub auth_capacity: i64,
    pub anon_capacity: i64,
    pub threshold: i64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_s: 60,
            auth_capacity: 60,
            anon_capacity: 25,
            threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitError {
    pub retry_after_s: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    window_start: DateTime<Utc>,
    remaining_auth: i64,
    remaining_anon: i64,
    last_auth_limit: i64,
    last_anon_limit: i64,
    is_rate_limited: bool,
    reset_at: DateTime<Utc>,
}

/// Per-provider limiter. Clone is cheap (shared `Arc<RwLock<_>>` state).
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    inner: Arc<RwLock<Inner>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                window_start: now,
                remaining_auth: config.auth_capacity,
                remaining_anon: config.anon_capacity,
                last_auth_limit: config.auth_capacity,
                last_anon_limit: config.anon_capacity,
                is_rate_limited: false,
                reset_at: now,
            })),
        }
    }

    /// Does not block. Returns `Ok(())` if the caller may proceed, or a
    /// `RateLimitError` with the time to wait. On the latter, a countdown
    /// task is spawned that clears the flag on its own.
    pub async fn check(&self, is_auth: bool) -> Result<(), RateLimitError> {
        let mut state = self.inner.write().await;
        let now = Utc::now();

        if now.signed_duration_since(state.window_start).num_seconds() >= self.config.window_s {
            state.window_start = now;
            state.remaining_auth = state.last_auth_limit;
            state.remaining_anon = state.last_anon_limit;
        }

        let remaining = if is_auth {
            state.remaining_auth
        } else {
            state.remaining_anon
        };

        if remaining <= self.config.threshold {
            let window_end = state.window_start + chrono::Duration::seconds(self.config.window_s);
            let retry_after_s = (window_end - now).num_seconds().max(0) as u64;
            state.is_rate_limited = true;
            state.reset_at = window_end;

            let inner = self.inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(StdDuration::from_secs(retry_after_s.max(1))).await;
                let mut state = inner.write().await;
                state.is_rate_limited = false;
                debug!("rate limiter countdown cleared");
            });

            warn!(retry_after_s, "rate limit threshold reached");
            return Err(RateLimitError {
                retry_after_s,
                reset_at: window_end,
            });
        }

        Ok(())
    }

    /// Called only after a successful provider response.
    pub async fn decrement(&self, is_auth: bool) {
        let mut state = self.inner.write().await;
        if is_auth {
            state.remaining_auth = (state.remaining_auth - 1).max(0);
        } else {
            state.remaining_anon = (state.remaining_anon - 1).max(0);
        }
    }

    /// Parse `X-…-Ratelimit` / `X-…-Ratelimit-Remaining` (and `-Auth-` variants).
    /// `"/"` or empty values are ignored; unknown capacities keep the compile-time
    /// default.
    pub async fn update_from_headers(&self, headers: &HeaderMap, prefix: &str) {
        let mut state = self.inner.write().await;

        let read = |name: String| -> Option<i64> {
            headers
                .get(&name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty() && *v != "/")
                .and_then(|v| v.parse::<i64>().ok())
        };

        if let Some(v) = read(format!("x-{prefix}-ratelimit-auth")) {
            state.last_auth_limit = v;
        }
        if let Some(v) = read(format!("x-{prefix}-ratelimit-auth-remaining")) {
            state.remaining_auth = v;
        }
        if let Some(v) = read(format!("x-{prefix}-ratelimit")) {
            state.last_anon_limit = v;
        }
        if let Some(v) = read(format!("x-{prefix}-ratelimit-remaining")) {
            state.remaining_anon = v;
        }
    }

    /// HTTP 429 path: sets the rate-limited flag and spawns the countdown,
    /// never blocking the caller.
    pub async fn on_http_429(&self, retry_after_s: u64) -> RateLimitError {
        let mut state = self.inner.write().await;
        let reset_at = Utc::now() + chrono::Duration::seconds(retry_after_s as i64);
        state.is_rate_limited = true;
        state.reset_at = reset_at;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_secs(retry_after_s.max(1))).await;
            let mut state = inner.write().await;
            state.is_rate_limited = false;
        });

        RateLimitError {
            retry_after_s,
            reset_at,
        }
    }

    pub async fn is_limited(&self) -> bool {
        self.inner.read().await.is_rate_limited
    }

    pub async fn seconds_until_reset(&self) -> i64 {
        let state = self.inner.read().await;
        (state.reset_at - Utc::now()).num_seconds().max(0)
    }

    pub async fn clear(&self) {
        let mut state = self.inner.write().await;
        state.is_rate_limited = false;
    }

    pub async fn remaining_auth(&self) -> i64 {
        self.inner.read().await.remaining_auth
    }

    pub async fn remaining_anon(&self) -> i64 {
        self.inner.read().await.remaining_anon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_boundary_triggers_rate_limited() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            window_s: 60,
            auth_capacity: 3,
            anon_capacity: 3,
            threshold: 2,
        });

        // remaining starts at 3; decrement once -> 2, which is <= threshold.
        limiter.decrement(true).await;
        assert_eq!(limiter.remaining_auth().await, 2);
        assert!(limiter.check(true).await.is_err());
    }

    #[tokio::test]
    async fn test_check_ok_above_threshold() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            window_s: 60,
            auth_capacity: 10,
            anon_capacity: 10,
            threshold: 2,
        });
        assert!(limiter.check(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_from_headers_ignores_slash_placeholder() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-discogs-ratelimit-remaining", "/".parse().unwrap());
        headers.insert("x-discogs-ratelimit", "60".parse().unwrap());
        limiter.update_from_headers(&headers, "discogs").await;

        // remaining_anon untouched by the "/" value, stays at default capacity.
        assert_eq!(limiter.remaining_anon().await, RateLimiterConfig::default().anon_capacity);
    }

    #[tokio::test]
    async fn test_on_http_429_sets_limited() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        let err = limiter.on_http_429(1).await;
        assert_eq!(err.retry_after_s, 1);
        assert!(limiter.is_limited().await);
    }
}
