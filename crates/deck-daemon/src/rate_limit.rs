use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
}

impl RateLimit {
    pub fn headers(&self) -> [(&'static str, String); 2] {
        [
            (LIMIT_HEADER, self.limit.to_string()),
            (REMAINING_HEADER, self.remaining.to_string()),
        ]
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter per token. Only the `unique_tokens` most
/// recently seen tokens are tracked.
pub struct RateLimiter {
    interval: Duration,
    windows: Mutex<LruCache<String, Window>>,
}

impl RateLimiter {
    pub fn new(interval: Duration, unique_tokens: usize) -> Self {
        let capacity = NonZeroUsize::new(unique_tokens).unwrap_or(NonZeroUsize::MIN);
        Self {
            interval,
            windows: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn check(&self, limit: u32, token: &str) -> RateLimit {
        self.check_at(limit, token, Instant::now())
    }

    fn check_at(&self, limit: u32, token: &str, now: Instant) -> RateLimit {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let window = windows.get_or_insert_mut(token.to_string(), || Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.interval {
            window.started = now;
            window.count = 0;
        }
        window.count = window.count.saturating_add(1);

        RateLimit {
            limited: window.count > limit,
            limit,
            remaining: limit.saturating_sub(window.count),
        }
    }
}
