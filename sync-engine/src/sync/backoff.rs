//! Retry backoff policy
//!
//! Exponential backoff with jitter, capped. Shared by the dispatcher (per
//! mutation entry) and the reconciliation puller (per failed pull round).

use rand::Rng;
use shared::util::now_millis;

/// Exponential backoff: `base * 2^attempt`, capped at `max`, ±25% jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before attempt `attempt + 1` (0-based count of failures so far)
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.min(20);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);

        // ±25% jitter so a fleet of terminals does not retry in lockstep
        let jitter_span = delay / 4;
        if jitter_span == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_span * 2);
        delay - jitter_span + jitter
    }

    /// Absolute retry deadline in unix millis
    pub fn next_attempt_at(&self, attempt: u32) -> i64 {
        now_millis() + self.delay_ms(attempt) as i64
    }
}
