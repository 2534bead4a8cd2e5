use std::time::Duration;

use rand::Rng;

use crate::config::BackoffSettings;

/// Exponential backoff with full jitter.
///
/// The ceiling doubles from `base` on every attempt up to `max`; each delay
/// is drawn uniformly from `0..=ceiling`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(settings: &BackoffSettings) -> Self {
        Self {
            base: Duration::from_millis(settings.base_ms),
            max: Duration::from_millis(settings.max_ms.max(settings.base_ms)),
            attempt: 0,
        }
    }

    /// Upper bound for the next delay.
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = u64::try_from(self.ceiling().as_millis()).unwrap_or(u64::MAX);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
