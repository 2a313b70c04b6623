//! Token-bucket rate limiter.
//!
//! Starts full at `max_burst` tokens, refills at `max_per_second` tokens per
//! second. `allow_message` consumes one token on success; on empty bucket it
//! returns `false` and bumps a blocked counter. Refill is computed lazily
//! from elapsed wall-clock time rather than a timer, capped at `max_burst`
//! (spec §4.5, invariant 5 in §8).

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_per_second: f64,
    pub max_burst: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_second: 50.0,
            max_burst: 50.0,
        }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    tokens: f64,
    last_refill_ms: u64,
    blocked_count: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, now_ms: u64) -> Self {
        let tokens = config.max_burst;
        Self {
            config,
            tokens,
            last_refill_ms: now_ms,
            blocked_count: 0,
        }
    }

    fn refill(&mut self, now_ms: u64) {
        let elapsed_seconds = now_ms.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        if elapsed_seconds <= 0.0 {
            return;
        }
        self.tokens = (self.tokens + elapsed_seconds * self.config.max_per_second)
            .min(self.config.max_burst);
        self.last_refill_ms = now_ms;
    }

    /// Consume one token if available. Returns `true` when the message is
    /// allowed, `false` when the bucket is empty (and increments the
    /// blocked counter).
    pub fn allow_message(&mut self, now_ms: u64) -> bool {
        self.refill(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            self.blocked_count += 1;
            false
        }
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked_count
    }

    pub fn available_tokens(&self) -> f64 {
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full() {
        let limiter = RateLimiter::new(
            RateLimiterConfig {
                max_per_second: 5.0,
                max_burst: 5.0,
            },
            0,
        );
        assert_eq!(limiter.available_tokens(), 5.0);
    }

    // Scenario S6: maxPerSecond=5, maxBurst=5. 10 arrive at t=0: 5 dispatch,
    // 5 rate-limited. After one full second, 5 more arrive and all dispatch.
    #[test]
    fn s6_rate_limit_burst_then_refill() {
        let mut limiter = RateLimiter::new(
            RateLimiterConfig {
                max_per_second: 5.0,
                max_burst: 5.0,
            },
            0,
        );

        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.allow_message(0) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
        assert_eq!(limiter.blocked_count(), 5);

        let mut allowed_after = 0;
        for _ in 0..5 {
            if limiter.allow_message(1000) {
                allowed_after += 1;
            }
        }
        assert_eq!(allowed_after, 5);
    }

    #[test]
    fn refill_is_capped_at_max_burst() {
        let mut limiter = RateLimiter::new(
            RateLimiterConfig {
                max_per_second: 100.0,
                max_burst: 5.0,
            },
            0,
        );
        // Drain, then let a huge amount of time pass.
        for _ in 0..5 {
            limiter.allow_message(0);
        }
        limiter.refill(1_000_000);
        assert_eq!(limiter.available_tokens(), 5.0);
    }

    proptest::proptest! {
        // Invariant 5: allowed <= min(k, maxBurst + floor(t * maxPerSecond))
        #[test]
        fn bounded_by_burst_and_rate(
            k in 1u32..200,
            t_seconds in 0u32..20,
            max_per_second in 1.0f64..20.0,
            max_burst in 1.0f64..20.0,
        ) {
            let mut limiter = RateLimiter::new(
                RateLimiterConfig { max_per_second, max_burst },
                0,
            );
            let mut allowed = 0u32;
            for i in 0..k {
                // Spread attempts evenly across the window up to t_seconds.
                let now_ms = if k <= 1 { 0 } else { (i as u64 * t_seconds as u64 * 1000) / (k as u64) };
                if limiter.allow_message(now_ms) {
                    allowed += 1;
                }
            }
            let bound = (k as f64).min(max_burst + (t_seconds as f64 * max_per_second).floor());
            proptest::prop_assert!((allowed as f64) <= bound + 1e-9);
        }
    }
}
