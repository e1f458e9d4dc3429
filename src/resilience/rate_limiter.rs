use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct StartWindowSnapshot {
    pub max_starts: u32,
    pub window_ms: u64,
    pub started_in_window: u32,
    /// Time until the current window closes (ms), if it is exhausted.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StartWindowConfig {
    /// Starts allowed per window. `0` disables the limit.
    pub max_starts: u32,
    pub window: Duration,
}

impl StartWindowConfig {
    pub fn new() -> Self {
        Self {
            max_starts: 0,
            window: Duration::from_secs(1),
        }
    }

    pub fn unlimited() -> Self {
        Self::new()
    }

    pub fn with_max_starts(mut self, n: u32) -> Self {
        self.max_starts = n;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl Default for StartWindowConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-window start limiter.
///
/// Counts task starts inside consecutive windows of fixed length. It holds no
/// lock of its own: the owner (the admission scheduler) keeps it inside its
/// state mutex so the window check and the start happen atomically.
#[derive(Debug)]
pub struct StartWindow {
    cfg: StartWindowConfig,
    window_start: Instant,
    started: u32,
}

impl StartWindow {
    pub fn new(cfg: StartWindowConfig) -> Self {
        Self {
            cfg,
            window_start: Instant::now(),
            started: 0,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.cfg.max_starts == 0 || self.cfg.window.is_zero()
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.cfg.window {
            let windows = elapsed.as_nanos() / self.cfg.window.as_nanos().max(1);
            let advance = self.cfg.window.as_nanos() * windows;
            self.window_start += Duration::from_nanos(advance.min(u64::MAX as u128) as u64);
            self.started = 0;
        }
    }

    /// Record a start if the current window has room; otherwise return how long
    /// until the next window opens.
    pub fn try_start(&mut self, now: Instant) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        self.roll(now);
        if self.started < self.cfg.max_starts {
            self.started += 1;
            Ok(())
        } else {
            Err((self.window_start + self.cfg.window).saturating_duration_since(now))
        }
    }

    pub fn snapshot(&mut self, now: Instant) -> StartWindowSnapshot {
        if !self.is_unlimited() {
            self.roll(now);
        }
        let exhausted = !self.is_unlimited() && self.started >= self.cfg.max_starts;
        StartWindowSnapshot {
            max_starts: self.cfg.max_starts,
            window_ms: self.cfg.window.as_millis() as u64,
            started_in_window: self.started,
            estimated_wait_ms: exhausted.then(|| {
                (self.window_start + self.cfg.window)
                    .saturating_duration_since(now)
                    .as_millis() as u64
            }),
        }
    }
}
