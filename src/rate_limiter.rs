use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::timeouts::RATE_LIMIT_WINDOW;

/// Sliding window rate limiter keyed by an arbitrary string (here,
/// `"{provider}:{client_ip}"`). A per-key deque of admission timestamps is
/// trimmed on every check.
///
/// This is correct but unbounded in the key dimension under attack — an
/// attacker rotating source IPs grows the map forever. Capping the key
/// count with an eviction policy, or moving this to a shared store in
/// multi-instance deployments, is a known open improvement and out of
/// scope here.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
    cap: u32,
}

impl RateLimiter {
    pub fn new(cap: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            cap,
        }
    }

    /// Admit a request at `now` (unix seconds) under `key`, or reject if the
    /// window already holds `cap` or more entries.
    pub fn check(&self, key: &str, now: i64) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(key.to_string()).or_default();

        let cutoff = now - RATE_LIMIT_WINDOW.as_secs() as i64;
        while matches!(window.front(), Some(&ts) if ts <= cutoff) {
            window.pop_front();
        }

        if window.len() as u32 >= self.cap {
            return false;
        }
        window.push_back(now);
        true
    }
}
