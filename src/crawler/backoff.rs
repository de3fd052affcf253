//! Capped exponential backoff with jitter
//!
//! Used for claim polling and for retrying transient store failures. Jitter
//! keeps workers that failed at the same moment from retrying in lockstep.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter_percent: u64,
}

impl ExponentialBackoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    /// Delay before retry number `attempt` (zero-based)
    ///
    /// The capped delay is never exceeded by more than the jitter share.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;

        let capped = base_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(20)))
            .min(max_ms);

        let jitter = match capped.saturating_mul(self.jitter_percent) / 100 {
            0 => 0,
            spread => rand::thread_rng().gen_range(0..=spread),
        };

        Duration::from_millis(capped + jitter)
    }
}
