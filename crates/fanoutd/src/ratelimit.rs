use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window admission counter keyed by client address.
///
/// Unlike a fixed window that resets at fixed intervals, this tracks
/// individual attempt timestamps and only counts those within the
/// sliding window, so a burst straddling a window edge is still limited.
///
/// Each address's queue is guarded by its map shard, so the
/// check-then-record in [`RateLimiter::allow`] is atomic per address.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    capacity: usize,
    attempts: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `capacity` attempts per `window`.
    #[must_use]
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            window,
            capacity,
            attempts: DashMap::new(),
        }
    }

    /// Check the quota for `address` and record the attempt if allowed.
    pub fn allow(&self, address: &str) -> bool {
        self.allow_at(address, Instant::now())
    }

    fn allow_at(&self, address: &str, now: Instant) -> bool {
        let mut queue = self.attempts.entry(address.to_string()).or_default();
        expire(&mut queue, now, self.window);

        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(now);
        true
    }

    /// Drop expired attempts for every address and forget addresses
    /// left with none.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    fn cleanup_at(&self, now: Instant) {
        self.attempts.retain(|_, queue| {
            expire(queue, now, self.window);
            !queue.is_empty()
        });
    }

    /// Number of addresses currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}

/// Remove attempts at least `window` old.
fn expire(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = queue.front() {
        if now.duration_since(oldest) >= window {
            queue.pop_front();
        } else {
            break;
        }
    }
}
