//! Sliding-window admission control.
//!
//! One limiter instance covers one class of traffic (request-style calls or
//! per-connection messages). Keys map to independent windows so one hot key
//! never serializes checks for the others: the outer map lock is held only
//! long enough to clone the per-key handle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window rate limiter. Never errors; at capacity it denies.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    windows: Mutex<HashMap<String, Arc<Mutex<VecDeque<Instant>>>>>,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter admitting `per_minute` events per key per trailing minute.
    pub fn per_minute(per_minute: usize) -> Self {
        Self::new(per_minute, Duration::from_secs(60))
    }

    /// Check-and-record admission for `key`. Prunes expired timestamps,
    /// admits iff the remaining count is below capacity, and records the
    /// admission timestamp on success.
    pub async fn check(&self, key: &str) -> bool {
        let window = {
            let mut map = self.windows.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
                .clone()
        };

        let now = Instant::now();
        let mut timestamps = window.lock().await;
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() >= self.capacity {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Drop a key's window entirely (connection closed, session evicted).
    pub async fn forget(&self, key: &str) {
        self.windows.lock().await.remove(key);
    }
}
