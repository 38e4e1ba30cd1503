use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::debug;

use crate::metrics::RATE_LIMITER_ENTRIES;

// Rate limit entry - tracks requests per client identity
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

// Fixed-window limiter, one entry per client identity.
// Bursts straddling a window boundary can reach 2x the limit.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    limit: u32,       // max requests allowed per window
    window: Duration, // length of one window
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    // rejected requests still count
    pub fn check(&self, identity: &str, now: Instant) -> bool {
        // the entry guard holds the shard lock, so the read-modify-write
        // below is serialised per identity
        let mut entry = self
            .entries
            .entry(identity.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });

        // window expired..? reset it
        if now.saturating_duration_since(entry.window_start) > self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.limit
    }

    // Drop every entry whose window is over. A request arriving later
    // would have reset it anyway.
    pub fn sweep(&self, now: Instant) -> usize {
        if self.is_empty() {
            return 0;
        }

        let before = self.entries.len();
        let window = self.window;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.window_start) <= window);
        let removed = before.saturating_sub(self.entries.len());
        RATE_LIMITER_ENTRIES.set(self.entries.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Sweeper - keeps the identity map from growing forever
pub async fn sweeper(rate_limiter: Arc<RateLimiter>, sweep_interval: Duration) {
    let mut interval = interval(sweep_interval);

    debug!(?sweep_interval, "rate limit sweeper started");

    loop {
        interval.tick().await;

        let removed = rate_limiter.sweep(Instant::now());
        if removed > 0 {
            debug!(removed, remaining = rate_limiter.len(), "swept expired rate limit windows");
        }
    }
}
