use std::time::Duration;

pub const BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff with uniform jitter.
///
/// The k-th delay is `min(base * 2^k + jitter, cap)` with jitter drawn
/// uniformly from `[0, base)`. Attempt counting saturates so the delay
/// never overflows past the cap.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(BACKOFF_BASE, BACKOFF_CAP)
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Next delay to wait before retrying; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        use rand::Rng;

        let exp = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);

        let scaled = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap);
        let jitter_ms = self.base.as_millis().max(1) as u64;
        let jitter = Duration::from_millis(rand::rng().random_range(0..jitter_ms));
        (scaled + jitter).min(self.cap)
    }
}
