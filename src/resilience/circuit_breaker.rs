use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    /// How many times the breaker has tripped.
    pub trips: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    trips: u64,
}

/// Consecutive-failure circuit breaker.
///
/// The worker pool keeps one per slot and records a failure for every
/// short-lived worker exit. Once open, `allow` reports the remaining cooldown.
/// When the cooldown expires the breaker closes with a fresh count.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
                trips: 0,
            }),
        }
    }

    /// `Err(remaining)` while open.
    pub fn allow(&self) -> Result<(), Duration> {
        let mut st = self.state.lock();
        if let Some(until) = st.open_until {
            let now = Instant::now();
            if now < until {
                return Err(until - now);
            }
            // cooldown expired
            st.open_until = None;
            st.consecutive_failures = 0;
        }
        Ok(())
    }

    pub fn on_success(&self) {
        let mut st = self.state.lock();
        st.consecutive_failures = 0;
        st.open_until = None;
    }

    /// Returns true when this failure tripped the breaker.
    pub fn on_failure(&self) -> bool {
        let mut st = self.state.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        if st.open_until.is_none() && st.consecutive_failures >= self.cfg.failure_threshold {
            st.open_until = Some(Instant::now() + self.cfg.cooldown);
            st.trips += 1;
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.state.lock();
        let open_remaining_ms = st
            .open_until
            .filter(|until| *until > now)
            .map(|until| (until - now).as_millis() as u64);
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
            trips: st.trips,
        }
    }
}
