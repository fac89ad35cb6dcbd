// SPDX-License-Identifier: Apache-2.0

//! Patch admission rate limiting.
//!
//! Two independent gates: a per-target trailing window (at most
//! `max_patches_per_minute` accepted patches per target within
//! `rate_limit_window_seconds`) and a global cooldown (minimum spacing
//! between any two accepted patches). Urgent and safety patches bypass both;
//! the caller decides that, the limiter only counts.

use phoenix_config::ProcessorId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Sliding-window rate limiter with a global cooldown.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<ProcessorId, VecDeque<Instant>>,
    last_accepted: Option<Instant>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `target` has headroom in its trailing window.
    pub fn target_has_headroom(
        &mut self,
        target: &ProcessorId,
        now: Instant,
        window: Duration,
        max_in_window: u32,
    ) -> bool {
        let ring = self.windows.entry(target.clone()).or_default();
        while let Some(front) = ring.front() {
            if now.duration_since(*front) >= window {
                let _ = ring.pop_front();
            } else {
                break;
            }
        }
        (ring.len() as u32) < max_in_window
    }

    /// Returns true when the global cooldown since the last accepted patch
    /// has elapsed.
    #[must_use]
    pub fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_accepted {
            Some(last) => now.duration_since(last) >= cooldown,
            None => true,
        }
    }

    /// Records an accepted patch against `target`'s window and the global
    /// cooldown clock.
    pub fn record_accepted(&mut self, target: &ProcessorId, now: Instant) {
        self.windows.entry(target.clone()).or_default().push_back(now);
        self.last_accepted = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn window_admits_up_to_max() {
        let mut limiter = RateLimiter::new();
        let target = ProcessorId::named("adaptive_topk");
        let now = Instant::now();

        assert!(limiter.target_has_headroom(&target, now, WINDOW, 2));
        limiter.record_accepted(&target, now);
        assert!(limiter.target_has_headroom(&target, now, WINDOW, 2));
        limiter.record_accepted(&target, now);
        assert!(!limiter.target_has_headroom(&target, now, WINDOW, 2));
    }

    #[test]
    fn window_slides() {
        let mut limiter = RateLimiter::new();
        let target = ProcessorId::named("adaptive_topk");
        let start = Instant::now();

        limiter.record_accepted(&target, start);
        assert!(!limiter.target_has_headroom(&target, start, WINDOW, 1));
        // One window later the old entry ages out.
        let later = start + WINDOW;
        assert!(limiter.target_has_headroom(&target, later, WINDOW, 1));
    }

    #[test]
    fn targets_are_independent() {
        let mut limiter = RateLimiter::new();
        let a = ProcessorId::named("adaptive_topk");
        let b = ProcessorId::named("reservoir_sampler");
        let now = Instant::now();

        limiter.record_accepted(&a, now);
        assert!(!limiter.target_has_headroom(&a, now, WINDOW, 1));
        assert!(limiter.target_has_headroom(&b, now, WINDOW, 1));
    }

    #[test]
    fn cooldown_is_global() {
        let mut limiter = RateLimiter::new();
        let a = ProcessorId::named("adaptive_topk");
        let now = Instant::now();
        let cooldown = Duration::from_secs(5);

        assert!(limiter.cooldown_elapsed(now, cooldown));
        limiter.record_accepted(&a, now);
        assert!(!limiter.cooldown_elapsed(now + Duration::from_secs(1), cooldown));
        assert!(limiter.cooldown_elapsed(now + cooldown, cooldown));
    }
}
