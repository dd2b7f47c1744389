// src/server/security.rs
//! Per-client download rate limiting
//!
//! Token bucket per client identity (normally the client IP). New clients
//! start with a full bucket; tokens refill continuously at the configured
//! rate up to the burst size. Idle buckets are swept periodically so the
//! map does not grow without bound.

use crate::server::ServerState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rate limiter settings
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub requests_per_second: f64,
    /// Bucket capacity
    pub burst: u32,
    /// Buckets untouched for longer than this are evicted
    pub idle_expiry: Duration,
}

/// Token bucket rate limiter keyed by client identity
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateBucket>>,
    config: RateLimitConfig,
}

struct RateBucket {
    tokens: f64,
    last_update: Instant,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check if a request from `identity` should be allowed now
    pub fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Instant::now())
    }

    /// Check if a request from `identity` should be allowed at `now`
    pub fn allow_at(&self, identity: &str, now: Instant) -> bool {
        let burst = f64::from(self.config.burst);
        let mut buckets = self.buckets.lock();

        let bucket = buckets.entry(identity.to_string()).or_insert_with(|| RateBucket {
            tokens: burst,
            last_update: now,
        });

        // Refill tokens based on elapsed time
        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second).min(burst);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle longer than the configured expiry, returning how many went
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.last_update) <= self.config.idle_expiry
        });
        before - buckets.len()
    }

    /// Number of tracked clients
    pub fn tracked(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Run `evict_idle` every `interval` until the runtime shuts down
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle(Instant::now());
                if evicted > 0 {
                    debug!("Evicted {} idle rate limit buckets", evicted);
                }
            }
        })
    }
}

/// Resolve the client identity used for rate limiting
///
/// The trusted proxy header wins when configured and present (first entry of
/// a comma-separated list); otherwise the socket peer address is used.
pub fn client_identity(
    headers: &HeaderMap,
    trusted_header: Option<&str>,
    peer: Option<SocketAddr>,
) -> String {
    if let Some(name) = trusted_header
        && let Some(value) = headers.get(name).and_then(|v| v.to_str().ok())
        && let Some(first) = value.split(',').map(str::trim).find(|s| !s.is_empty())
    {
        return first.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware applying the rate limiter to download routes
pub async fn rate_limit(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(
        request.headers(),
        state.config.trusted_proxy_header.as_deref(),
        peer,
    );

    if limiter.allow(&identity) {
        return next.run(request).await;
    }

    warn!(client = %identity, path = %request.uri().path(), "Rate limit exceeded");
    state.metrics.record_rate_limited();
    too_many_requests()
}

/// 429 response with a one second retry hint
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, "1")],
        Json(serde_json::json!({
            "error": "Too many requests",
            "retry_after": "1s",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limiter(rps: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_second: rps,
            burst,
            idle_expiry: Duration::from_secs(300),
        })
    }

    #[test]
    fn test_rate_limiter_burst_then_refill() {
        let limiter = limiter(1.0, 5);
        let start = Instant::now();

        // First 5 requests should succeed (burst)
        for _ in 0..5 {
            assert!(limiter.allow_at("192.168.1.1", start));
        }

        // 6th request should fail (burst exhausted)
        assert!(!limiter.allow_at("192.168.1.1", start));

        // One second later exactly one token is back
        let later = start + Duration::from_secs(1);
        assert!(limiter.allow_at("192.168.1.1", later));
        assert!(!limiter.allow_at("192.168.1.1", later));
    }

    #[test]
    fn test_rate_limiter_isolates_clients() {
        let limiter = limiter(1.0, 1);
        let now = Instant::now();

        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
    }

    #[test]
    fn test_refill_is_capped_at_burst() {
        let limiter = limiter(10.0, 2);
        let start = Instant::now();

        assert!(limiter.allow_at("ip", start));
        let much_later = start + Duration::from_secs(3600);
        assert!(limiter.allow_at("ip", much_later));
        assert!(limiter.allow_at("ip", much_later));
        assert!(!limiter.allow_at("ip", much_later));
    }

    #[test]
    fn test_evict_idle() {
        let limiter = limiter(1.0, 5);
        let start = Instant::now();

        limiter.allow_at("old", start);
        limiter.allow_at("fresh", start + Duration::from_secs(200));
        assert_eq!(limiter.tracked(), 2);

        let evicted = limiter.evict_idle(start + Duration::from_secs(400));
        assert_eq!(evicted, 1);
        assert_eq!(limiter.tracked(), 1);

        // An evicted client starts over with a full bucket
        let now = start + Duration::from_secs(400);
        for _ in 0..5 {
            assert!(limiter.allow_at("old", now));
        }
    }

    #[test]
    fn test_client_identity_prefers_trusted_header() {
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));

        assert_eq!(
            client_identity(&headers, Some("X-Forwarded-For"), Some(peer)),
            "203.0.113.9"
        );
        assert_eq!(client_identity(&headers, None, Some(peer)), "10.0.0.1");
        assert_eq!(client_identity(&HeaderMap::new(), Some("X-Forwarded-For"), Some(peer)), "10.0.0.1");
        assert_eq!(client_identity(&HeaderMap::new(), None, None), "unknown");
    }

    #[tokio::test]
    async fn test_too_many_requests_response() {
        let response = too_many_requests();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");
    }
}
