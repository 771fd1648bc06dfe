use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::ApiError;

/// Fixed-window request counter keyed by client address
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    trusted_hops: usize,
    message: &'static str,
    hits: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            trusted_hops: 0,
            message: "Too many requests, please try again later",
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Number of reverse proxies whose `X-Forwarded-For` entries are trusted.
    pub fn trusted_hops(mut self, hops: usize) -> Self {
        self.trusted_hops = hops;
        self
    }

    pub fn message(mut self, message: &'static str) -> Self {
        self.message = message;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Records a hit; false once `key` exceeded the limit in the current window.
    pub async fn check(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().await;
        hits.retain(|_, (start, _)| now.duration_since(*start) < self.window);

        let entry = hits.entry(key.to_string()).or_insert((now, 0));
        entry.1 += 1;
        entry.1 <= self.limit
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let key = client_key(&headers, peer, limiter.trusted_hops);
    if !limiter.check(&key, Instant::now()).await {
        tracing::warn!("Rate limit exceeded for {}", key);
        return Err(ApiError::too_many_requests(limiter.message));
    }
    Ok(next.run(request).await)
}

/// The peer address, or with `hops` trusted proxies the `X-Forwarded-For`
/// entry the outermost trusted proxy appended (`hops` from the right).
/// Entries further left are client-written and never used.
fn client_key(headers: &HeaderMap, peer: Option<String>, hops: usize) -> String {
    if hops > 0 {
        let forwarded: Vec<&str> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        if !forwarded.is_empty() {
            let index = forwarded.len().saturating_sub(hops);
            return forwarded[index].to_string();
        }
    }
    peer.unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn blocks_after_limit_within_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check("1.2.3.4", now).await);
        assert!(limiter.check("1.2.3.4", now).await);
        assert!(!limiter.check("1.2.3.4", now).await);
        assert!(limiter.check("5.6.7.8", now).await);
    }

    #[tokio::test]
    async fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        let start = Instant::now();
        assert!(limiter.check("a", start).await);
        assert!(!limiter.check("a", start).await);
        assert!(limiter.check("a", start + Duration::from_millis(11)).await);
    }

    #[test]
    fn without_trusted_proxies_forwarded_header_is_ignored() {
        let headers = forwarded("10.0.0.1, 203.0.113.7");
        assert_eq!(client_key(&headers, Some("198.51.100.2".into()), 0), "198.51.100.2");
        assert_eq!(client_key(&HeaderMap::new(), None, 0), "unknown");
    }

    #[test]
    fn trusted_hops_count_from_the_right() {
        let headers = forwarded("10.0.9.1, 203.0.113.7");
        assert_eq!(client_key(&headers, Some("127.0.0.1".into()), 1), "203.0.113.7");
        assert_eq!(client_key(&headers, Some("127.0.0.1".into()), 2), "10.0.9.1");
        // More hops configured than entries present: leftmost.
        assert_eq!(client_key(&headers, Some("127.0.0.1".into()), 5), "10.0.9.1");
        assert_eq!(client_key(&HeaderMap::new(), Some("127.0.0.1".into()), 1), "127.0.0.1");
    }
}
