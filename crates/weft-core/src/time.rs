use std::time::{Duration, Instant};

/// A resettable deadline.
///
/// Routing nodes drive all long-lived operations through timeouts of this
/// shape: pending adoption, endpoint outdatedness, recently-disconnected
/// suppression, parent id confirmation and the no-connection shutdown.
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
    started: Instant,
    period: Duration,
    elapsed_at_start: bool,
}

impl Timeout {
    /// Creates a timeout expiring `period` from now.
    pub fn new(period: Duration) -> Self {
        Self { started: Instant::now(), period, elapsed_at_start: false }
    }

    /// Creates a timeout that counts as expired until its first reset.
    pub fn expired(period: Duration) -> Self {
        Self { started: Instant::now(), period, elapsed_at_start: true }
    }

    /// Returns true once the period has elapsed since the last reset.
    pub fn is_expired(&self) -> bool {
        self.elapsed_at_start || self.started.elapsed() >= self.period
    }

    /// Restarts the timeout period from now.
    pub fn reset(&mut self) {
        self.started = Instant::now();
        self.elapsed_at_start = false;
    }

    /// The configured timeout period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time elapsed since the last reset.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Exponentially smoothed average of a duration series.
#[derive(Clone, Copy, Debug)]
pub struct SlidingAverage {
    value: f64,
    alpha: f64,
}

impl SlidingAverage {
    /// Creates an average with the given smoothing factor in (0, 1].
    pub fn new(alpha: f64) -> Self {
        Self { value: 0.0, alpha }
    }

    /// Folds a new sample into the average.
    pub fn add(&mut self, sample: Duration) {
        self.value = self.value * (1.0 - self.alpha) + sample.as_secs_f64() * self.alpha;
    }

    /// Returns the current smoothed average.
    pub fn get(&self) -> Duration {
        Duration::from_secs_f64(self.value.max(0.0))
    }
}

impl Default for SlidingAverage {
    fn default() -> Self {
        Self::new(0.05)
    }
}

/// Sleeps proportionally to the caller's idle streak, capped at 5 ms.
///
/// Owning loops call this with a streak counter that they reset to zero
/// whenever an update reports work done.
pub fn idle_pause(streak: u32) {
    std::thread::sleep(Duration::from_micros(u64::from(streak.min(5000))));
}
