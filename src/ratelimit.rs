//! Per-client sliding-window request limiting.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::error::AppError;

// above this many tracked clients every check also drops idle ones
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone)]
pub struct RateLimiter {
    hits: Arc<Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>>,
    clock: Arc<dyn Clock>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, max_requests: usize, window: Duration) -> Self {
        Self {
            hits: Arc::new(Mutex::new(HashMap::new())),
            clock,
            max_requests,
            window,
        }
    }

    /// Records a request from `key` unless it already used up the window.
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = self.clock.now();
        let window_start = now - self.window;
        let mut hits = self.hits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if hits.len() > PRUNE_THRESHOLD {
            hits.retain(|_, stamps| stamps.back().is_some_and(|last| *last > window_start));
        }

        let stamps = hits.entry(key.to_string()).or_default();
        while stamps.front().is_some_and(|first| *first <= window_start) {
            stamps.pop_front();
        }
        if stamps.len() >= self.max_requests {
            return false;
        }
        stamps.push_back(now);
        true
    }
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn limit_requests(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    if !limiter.check_and_record(&key) {
        warn!("rate limit hit by {} on {}", key, request.uri().path());
        return AppError::TooManyRequests(
            "Too many requests from this IP, please try again later.".to_string(),
        )
        .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;

    #[test]
    fn window_slides() {
        let clock = MockClock::at("2025-06-01T09:00:00Z");
        let limiter = RateLimiter::new(clock.clone(), 3, Duration::minutes(15));

        assert!(limiter.check_and_record("10.0.0.1"));
        clock.advance_minutes(5);
        assert!(limiter.check_and_record("10.0.0.1"));
        assert!(limiter.check_and_record("10.0.0.1"));
        assert!(!limiter.check_and_record("10.0.0.1"));
        assert!(limiter.check_and_record("10.0.0.2"));

        // the first request leaves the window
        clock.advance_minutes(10);
        assert!(limiter.check_and_record("10.0.0.1"));
        assert!(!limiter.check_and_record("10.0.0.1"));
    }

    #[test]
    fn refused_requests_do_not_extend_the_window() {
        let clock = MockClock::at("2025-06-01T09:00:00Z");
        let limiter = RateLimiter::new(clock.clone(), 1, Duration::minutes(1));

        assert!(limiter.check_and_record("a"));
        for _ in 0..5 {
            assert!(!limiter.check_and_record("a"));
        }
        clock.advance_minutes(1);
        assert!(limiter.check_and_record("a"));
    }
}
