//! Fixed-window rate limiter, keyed strictly by client IP (§4.3).
//!
//! Process-local by design (§5): the table is not shared across
//! processes, which is a documented limitation, not an oversight.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tam_domain::config::RateLimitConfig;

struct Window {
    started_at: Instant,
    count: u32,
}

/// Outcome of a rate-limit check, carrying the headers §4.7 requires
/// on every `/mcp`-prefixed response.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: Option<u64>,
}

pub struct RateLimiter {
    cfg: RateLimitConfig,
    windows: RwLock<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self { cfg, windows: RwLock::new(HashMap::new()) }
    }

    /// Check and record one request from `ip`. Never partitions the
    /// budget by a caller-supplied identifier such as session id —
    /// the key is always the network-level client IP.
    pub fn check(&self, ip: IpAddr) -> RateLimitDecision {
        let window_len = Duration::from_secs(self.cfg.window_secs);
        let now = Instant::now();

        let mut windows = self.windows.write();
        let entry = windows.entry(ip).or_insert_with(|| Window { started_at: now, count: 0 });

        if now.duration_since(entry.started_at) >= window_len {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.cfg.cap {
            let elapsed = now.duration_since(entry.started_at);
            let retry_after = window_len.saturating_sub(elapsed).as_secs().max(1);
            return RateLimitDecision {
                allowed: false,
                limit: self.cfg.cap,
                remaining: 0,
                retry_after_secs: Some(retry_after),
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: self.cfg.cap,
            remaining: self.cfg.cap - entry.count,
            retry_after_secs: None,
        }
    }

    /// Background sweep removing windows that have fully expired —
    /// run on a timer tied to the limiter's own lifetime (§9 Design
    /// Notes: shared state owned by the facade, not module-load
    /// globals).
    pub fn sweep_expired(&self) {
        let window_len = Duration::from_secs(self.cfg.window_secs);
        let now = Instant::now();
        self.windows
            .write()
            .retain(|_, w| now.duration_since(w.started_at) < window_len);
    }

    #[cfg(test)]
    pub fn window_count(&self) -> usize {
        self.windows.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(cap: u32) -> RateLimitConfig {
        RateLimitConfig { window_secs: 900, cap, sweep_interval_secs: 300 }
    }

    #[test]
    fn allows_up_to_cap_then_denies() {
        let limiter = RateLimiter::new(cfg(100));
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        for _ in 0..100 {
            assert!(limiter.check(ip).allowed);
        }
        let denied = limiter.check(ip);
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs.unwrap() > 0);
        assert!(denied.retry_after_secs.unwrap() < 900);
    }

    #[test]
    fn different_ip_gets_its_own_window() {
        let limiter = RateLimiter::new(cfg(1));
        let a: IpAddr = "203.0.113.5".parse().unwrap();
        let b: IpAddr = "203.0.113.6".parse().unwrap();
        assert!(limiter.check(a).allowed);
        assert!(!limiter.check(a).allowed);
        assert!(limiter.check(b).allowed);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::new(cfg(5));
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        assert_eq!(limiter.check(ip).remaining, 4);
        assert_eq!(limiter.check(ip).remaining, 3);
    }

    #[test]
    fn sweep_removes_expired_windows() {
        let mut small = cfg(10);
        small.window_secs = 0;
        let limiter = RateLimiter::new(small);
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        limiter.check(ip);
        assert_eq!(limiter.window_count(), 1);
        std::thread::sleep(Duration::from_millis(5));
        limiter.sweep_expired();
        assert_eq!(limiter.window_count(), 0);
    }
}
