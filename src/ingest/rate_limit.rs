// src/ingest/rate_limit.rs
//! Fixed-window request counter per source key.
//!
//! Bursts at window boundaries are accepted in exchange for O(1) state per key.
//! State is created lazily on the first request for a key and lives for the
//! process lifetime (the key set is bounded by configuration).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::ingest::types::SourceKey;

#[derive(Debug, Clone, Copy)]
struct RateWindowState {
    window_start: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<SourceKey, RateWindowState>>,
    max_per_window: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_per_window,
            window,
        }
    }

    pub fn per_minute(max_per_window: u32) -> Self {
        Self::new(max_per_window, Duration::from_secs(60))
    }

    /// Admit or reject one request for `key` at the current instant.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Check-and-increment runs under one lock, so concurrent callers for the
    /// same key can never over-admit.
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        if self.max_per_window == 0 {
            return false;
        }
        let mut windows = self.lock();
        match windows.get_mut(key) {
            Some(state) if now.saturating_duration_since(state.window_start) <= self.window => {
                if state.count >= self.max_per_window {
                    return false;
                }
                state.count += 1;
                true
            }
            // First request, or the window elapsed: start and window reset together.
            _ => {
                windows.insert(
                    SourceKey::from(key),
                    RateWindowState {
                        window_start: now,
                        count: 1,
                    },
                );
                true
            }
        }
    }

    /// Requests admitted so far in the current window (0 for unknown keys).
    pub fn current_count(&self, key: &str) -> u32 {
        self.lock().get(key).map(|s| s.count).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SourceKey, RateWindowState>> {
        match self.windows.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}
