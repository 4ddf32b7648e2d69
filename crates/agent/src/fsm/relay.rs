//! Address relay queue and rate limiting (§4.3, §4.4).
use std::collections::VecDeque;

use crate::address::PeerAddress;
use crate::time::{LocalDuration, LocalTime};

/// A fixed-window rate limiter. `note` charges `n` atomically: either the whole amount fits
/// in the current window or the call is rejected and nothing is charged (per the spec's
/// recommended resolution to the `addrLimit.note(n)` open question in §9).
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: LocalDuration,
    window_start: LocalTime,
    count: u32,
}

impl RateLimiter {
    pub fn new(limit: u32, window: LocalDuration, now: LocalTime) -> Self {
        Self {
            limit,
            window,
            window_start: now,
            count: 0,
        }
    }

    fn roll_window(&mut self, now: LocalTime) {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }
    }

    /// Attempt to charge `n` against the current window. Returns `false`, without charging
    /// anything, if that would exceed the limit.
    pub fn note(&mut self, now: LocalTime, n: u32) -> bool {
        self.roll_window(now);

        if self.count.saturating_add(n) > self.limit {
            return false;
        }
        self.count += n;
        true
    }
}

/// A throttled queue of address records pending relay to one peer (§4.3).
///
/// Combines a size-bounded FIFO with two rate limits: a per-interval batch cap
/// (`MAX_ADDR_RELAY_PER_MESSAGE`) and a global rolling-window cap (`ADDR_RATE_LIMIT`).
pub struct OutboundAddrQueue {
    pending: VecDeque<PeerAddress>,
    capacity: usize,
    per_interval_cap: usize,
    rate_limiter: RateLimiter,
    running: bool,
}

impl OutboundAddrQueue {
    pub fn new(
        capacity: usize,
        per_interval_cap: usize,
        rate_limit: u32,
        rate_window: LocalDuration,
        now: LocalTime,
    ) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity,
            per_interval_cap,
            rate_limiter: RateLimiter::new(rate_limit, rate_window, now),
            running: true,
        }
    }

    /// Enqueue one address for relay. Silently drops the oldest pending entry to make room
    /// once `capacity` is reached; this is a best-effort gossip queue, not a guaranteed
    /// delivery channel.
    pub fn enqueue(&mut self, address: PeerAddress) {
        if !self.running {
            return;
        }
        if self.pending.len() >= self.capacity {
            self.pending.pop_front();
        }
        self.pending.push_back(address);
    }

    /// Pop up to `MAX_ADDR_RELAY_PER_MESSAGE` items, chunked against the global rate limit.
    /// Returns an empty vec if the queue was stopped, empty, or the rate limit is exhausted.
    pub fn drain_batch(&mut self, now: LocalTime) -> Vec<PeerAddress> {
        if !self.running || self.pending.is_empty() {
            return Vec::new();
        }

        let want = self.per_interval_cap.min(self.pending.len());
        if !self.rate_limiter.note(now, want as u32) {
            return Vec::new();
        }

        self.pending.drain(..want).collect()
    }

    /// Stop the queue: no further batches are drained, and its contents are discarded.
    /// Called on channel close (§4.6); idempotent.
    pub fn stop(&mut self) {
        self.running = false;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Locator, Protocol, Services};

    fn addr(port: u16) -> PeerAddress {
        PeerAddress {
            protocol: Protocol::WebSocket,
            locator: Locator::Socket(format!("1.2.3.4:{port}").parse().unwrap()),
            services: Services::NONE,
            distance: 0,
            timestamp: 0,
            public_key: vec![],
            signature: vec![],
            peer_id: [0; 20],
            seed: false,
        }
    }

    #[test]
    fn drains_at_most_the_per_interval_cap() {
        let now = LocalTime::from_millis(0);
        let mut queue = OutboundAddrQueue::new(100, 10, 2_000, LocalDuration::from_secs(600), now);

        for port in 0..25 {
            queue.enqueue(addr(port));
        }

        let batch = queue.drain_batch(now);
        assert_eq!(batch.len(), 10);
        assert_eq!(queue.pending.len(), 15);
    }

    #[test]
    fn stop_clears_pending_and_disables_further_drains() {
        let now = LocalTime::from_millis(0);
        let mut queue = OutboundAddrQueue::new(100, 10, 2_000, LocalDuration::from_secs(600), now);
        queue.enqueue(addr(1));
        queue.stop();

        assert!(queue.drain_batch(now).is_empty());
        queue.enqueue(addr(2));
        assert!(queue.drain_batch(now).is_empty());
    }

    #[test]
    fn rate_limiter_rejects_the_whole_batch_atomically() {
        let now = LocalTime::from_millis(0);
        let mut limiter = RateLimiter::new(10, LocalDuration::from_secs(60), now);

        assert!(limiter.note(now, 10));
        assert!(!limiter.note(now, 1));
    }

    #[test]
    fn rate_limiter_resets_after_the_window_elapses() {
        let now = LocalTime::from_millis(0);
        let mut limiter = RateLimiter::new(10, LocalDuration::from_secs(60), now);

        assert!(limiter.note(now, 10));
        let later = now + LocalDuration::from_secs(61);
        assert!(limiter.note(later, 10));
    }
}
