//! Per-host request rate limiting.
//!
//! Each hostname gets a sliding window of request timestamps. A host that
//! already made `max_requests` requests inside the window is refused until
//! its oldest request ages out.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Default requests allowed per host per window.
pub const DEFAULT_REQUESTS_PER_WINDOW: u32 = 10;

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the time window.
    pub max_requests: u32,
    /// Time window for counting requests.
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit configuration.
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_WINDOW, DEFAULT_WINDOW_SECS)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed,
    /// Request is denied due to rate limit.
    Denied {
        /// Time until the oldest request leaves the window.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Request timestamps for a single host.
#[derive(Debug, Default)]
struct HostRequests {
    timestamps: Vec<Instant>,
}

impl HostRequests {
    /// Drop timestamps outside the window.
    fn cleanup(&mut self, window: Duration, now: Instant) {
        self.timestamps
            .retain(|&t| now.saturating_duration_since(t) < window);
    }

    fn retry_after(&self, window: Duration, now: Instant) -> Duration {
        self.timestamps
            .iter()
            .min()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Sliding-window rate limiter keyed by hostname.
///
/// Hostnames are compared case-insensitively.
///
/// # Example
///
/// ```
/// use pkgnews::rate_limit::{HostRateLimiter, RateLimitConfig};
///
/// let limiter = HostRateLimiter::new(RateLimitConfig::new(2, 60));
/// assert!(limiter.check_and_record("archlinux.org").is_allowed());
/// assert!(limiter.check_and_record("archlinux.org").is_allowed());
/// assert!(!limiter.check_and_record("archlinux.org").is_allowed());
/// assert!(limiter.check_and_record("security.archlinux.org").is_allowed());
/// ```
#[derive(Debug)]
pub struct HostRateLimiter {
    config: RateLimitConfig,
    hosts: RwLock<HashMap<String, HostRequests>>,
}

impl HostRateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check and record in one operation.
    ///
    /// Returns `Allowed` and records the request, or returns `Denied` without recording.
    pub fn check_and_record(&self, host: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        let requests = hosts.entry(host.to_ascii_lowercase()).or_default();

        requests.cleanup(self.config.window, now);

        if requests.timestamps.len() >= self.config.max_requests as usize {
            return RateLimitResult::Denied {
                retry_after: requests.retry_after(self.config.window, now),
            };
        }

        requests.timestamps.push(now);
        RateLimitResult::Allowed
    }

    /// Number of requests a host may still make in the current window.
    pub fn remaining(&self, host: &str) -> u32 {
        let now = Instant::now();
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);

        match hosts.get(&host.to_ascii_lowercase()) {
            Some(requests) => {
                let in_window = requests
                    .timestamps
                    .iter()
                    .filter(|&&t| now.saturating_duration_since(t) < self.config.window)
                    .count();
                self.config.max_requests.saturating_sub(in_window as u32)
            }
            None => self.config.max_requests,
        }
    }

    /// Number of hosts currently tracked.
    pub fn tracked_hosts(&self) -> usize {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget hosts with no requests inside the window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);

        for requests in hosts.values_mut() {
            requests.cleanup(self.config.window, now);
        }

        hosts.retain(|_, requests| !requests.timestamps.is_empty());
    }
}

impl Default for HostRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
