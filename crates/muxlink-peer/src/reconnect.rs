use std::time::{Duration, Instant};

/// Default connection attempts per reconnect cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default first backoff step.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default minimum spacing between connection attempts.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on a single async reconnect delay.
pub const ASYNC_DELAY_CAP: Duration = Duration::from_secs(10);

/// Exponential backoff settings shared by both clients.
///
/// Attempts are numbered from zero. Attempt 0 runs immediately; attempt
/// `n > 0` waits `base_delay * 2^(n-1)` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub min_interval: Duration,
    /// Optional cap applied to [`delay_for`](Self::delay_for).
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_delay: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_delay(mut self, cap: Option<Duration>) -> Self {
        self.max_delay = cap;
        self
    }

    /// Delay before blocking-client attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = self.base_delay.saturating_mul(doubling(attempt - 1));
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Delay before async-client attempt `attempt`: `base_delay * 2^n`,
    /// never more than [`ASYNC_DELAY_CAP`].
    pub fn capped_delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let cap = self.max_delay.unwrap_or(ASYNC_DELAY_CAP).min(ASYNC_DELAY_CAP);
        self.base_delay.saturating_mul(doubling(attempt)).min(cap)
    }
}

fn doubling(exponent: u32) -> u32 {
    1u32.checked_shl(exponent).unwrap_or(u32::MAX)
}

/// Enforces a minimum spacing between connection attempts.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// How long the next attempt must wait.
    pub fn wait_time(&self) -> Duration {
        self.last
            .map(|last| self.min_interval.saturating_sub(last.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Sleep out the remaining interval, then record a new attempt.
    pub fn wait(&mut self) {
        let remaining = self.wait_time();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.last = Some(Instant::now());
    }
}
