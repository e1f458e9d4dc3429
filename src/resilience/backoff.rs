use std::time::Duration;

/// Capped exponential backoff.
///
/// `delay(n)` is the wait before retry `n` (1-based): `min(base * 2^(n-1), cap)`.
/// `delay(0)` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let base = self.base.as_millis() as u64;
        let cap = self.cap.as_millis() as u64;
        let shift = (retry - 1).min(63);
        let delay = base.saturating_mul(1u64 << shift).min(cap);
        Duration::from_millis(delay)
    }

    /// Sum of the delays before retries `1..=retries`.
    pub fn total(&self, retries: u32) -> Duration {
        (1..=retries).map(|n| self.delay(n)).sum()
    }
}
