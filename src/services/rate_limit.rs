use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Sliding-window limiter for public share downloads, keyed by client address
pub struct RateLimiter {
    /// Request times per key within the current window
    requests: DashMap<String, Vec<Instant>>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            requests: DashMap::new(),
            window,
            max_requests,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_secs(config.window_seconds), config.max_requests)
    }

    /// Check if a request is allowed and record it
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self.requests.entry(key.to_string()).or_default();
        entry.retain(|&at| now.saturating_duration_since(at) < self.window);

        if entry.len() >= self.max_requests as usize {
            return false;
        }

        entry.push(now);
        true
    }

    /// Drop keys with no requests left in the window
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    pub fn sweep_at(&self, now: Instant) {
        self.requests.retain(|_, times| {
            times.retain(|&at| now.saturating_duration_since(at) < self.window);
            !times.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.requests.len()
    }
}
