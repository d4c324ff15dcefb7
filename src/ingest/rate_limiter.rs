// src/ingest/rate_limiter.rs
//! Sliding-window request throttle with jitter.
//!
//! Call [`RateLimiter::wait_for_rate_limit`] before every outbound request and
//! [`RateLimiter::record_request`] once a response has arrived, or
//! [`RateLimiter::release`] if none did. A successful wait reserves a slot, so
//! callers sharing one limiter never hold more than `max_requests_per_minute`
//! recorded plus in-flight requests in a window.

use rand::Rng as _;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ingest::config::RateLimitConfig;

#[derive(Debug, Default)]
struct Window {
    stamps: VecDeque<Instant>,
    /// Slots handed out by `wait_for_rate_limit` and not yet recorded.
    reserved: usize,
}

#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimitConfig,
    window: Mutex<Window>,
    /// Waiters take turns; held across the cooldown and spacing sleeps.
    turn: Mutex<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub requests_in_window: usize,
    pub in_flight: usize,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            cfg,
            window: Mutex::new(Window::default()),
            turn: Mutex::new(()),
        }
    }

    fn window_len(&self) -> Duration {
        Duration::from_millis(self.cfg.rate_window_ms)
    }

    fn max_requests(&self) -> usize {
        self.cfg.max_requests_per_minute.max(1) as usize
    }

    /// Even spacing between requests: `ceil(window / max)`.
    pub fn min_delay(&self) -> Duration {
        let max = u64::from(self.cfg.max_requests_per_minute.max(1));
        Duration::from_millis(self.cfg.rate_window_ms.div_ceil(max))
    }

    pub async fn wait_for_rate_limit(&self) {
        let _turn = self.turn.lock().await;
        loop {
            let wait = {
                let mut w = self.window.lock().await;
                let now = Instant::now();
                prune(&mut w.stamps, now, self.window_len());
                let used = w.stamps.len() + w.reserved;
                tracing::trace!(
                    target: "ingest",
                    used,
                    max = self.max_requests(),
                    "rate limit check"
                );
                if used < self.max_requests() {
                    w.reserved += 1;
                    break;
                }
                match w.stamps.front() {
                    Some(&oldest) => self.window_len().saturating_sub(now - oldest),
                    // every slot is held by a request still in flight
                    None => self.min_delay(),
                }
            };

            tracing::warn!(
                target: "ingest",
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, cooling down"
            );
            tokio::time::sleep(wait + Duration::from_millis(self.cfg.safety_margin_ms)).await;
        }

        let jitter = self.jitter();
        tokio::time::sleep(self.min_delay() + jitter).await;
    }

    pub async fn record_request(&self) {
        let mut w = self.window.lock().await;
        let now = Instant::now();
        w.reserved = w.reserved.saturating_sub(1);
        w.stamps.push_back(now);
        prune(&mut w.stamps, now, self.window_len());
        tracing::trace!(
            target: "ingest",
            in_window = w.stamps.len(),
            max = self.max_requests(),
            "request recorded"
        );
    }

    /// Give back a reserved slot whose request never got a response.
    pub async fn release(&self) {
        let mut w = self.window.lock().await;
        w.reserved = w.reserved.saturating_sub(1);
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let mut w = self.window.lock().await;
        prune(&mut w.stamps, Instant::now(), self.window_len());
        RateLimiterStats {
            requests_in_window: w.stamps.len(),
            in_flight: w.reserved,
            max_requests: self.cfg.max_requests_per_minute,
            window: self.window_len(),
        }
    }

    fn jitter(&self) -> Duration {
        let (lo, hi) = (self.cfg.min_jitter_ms, self.cfg.max_jitter_ms);
        let ms = if hi > lo {
            rand::rng().random_range(lo..=hi)
        } else {
            lo
        };
        Duration::from_millis(ms)
    }
}

/// Drop timestamps that are at least one window old.
fn prune(ts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = ts.front() {
        if now.duration_since(front) >= window {
            ts.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: u32, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_requests_per_minute: max,
            rate_window_ms: window_ms,
            min_jitter_ms: 0,
            max_jitter_ms: 0,
            safety_margin_ms: 0,
        }
    }

    #[test]
    fn min_delay_rounds_up() {
        assert_eq!(RateLimiter::new(cfg(120, 60_000)).min_delay(), Duration::from_millis(500));
        assert_eq!(RateLimiter::new(cfg(3, 1_000)).min_delay(), Duration::from_millis(334));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_at_least_min_delay() {
        let rl = RateLimiter::new(cfg(10, 1_000));
        let t0 = Instant::now();
        rl.wait_for_rate_limit().await;
        assert!(t0.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn full_window_blocks_until_oldest_expires() {
        let rl = RateLimiter::new(RateLimitConfig {
            safety_margin_ms: 50,
            ..cfg(2, 10_000)
        });
        rl.record_request().await;
        rl.record_request().await;
        assert_eq!(rl.stats().await.requests_in_window, 2);

        let t0 = Instant::now();
        rl.wait_for_rate_limit().await;
        // window (10s) + margin + min delay (5s)
        assert!(t0.elapsed() >= Duration::from_millis(15_050));
        let stats = rl.stats().await;
        assert_eq!((stats.requests_in_window, stats.in_flight), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn released_slot_is_reusable() {
        let rl = RateLimiter::new(cfg(1, 10_000));
        rl.wait_for_rate_limit().await;
        rl.release().await;

        let t0 = Instant::now();
        rl.wait_for_rate_limit().await;
        // only the spacing delay, no cooldown
        assert!(t0.elapsed() < Duration::from_millis(10_001));
        assert_eq!(rl.stats().await.in_flight, 1);
    }
}
