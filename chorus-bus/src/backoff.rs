//! Exponential backoff with jitter for transient bus errors.
//!
//! Starts at 100 ms, doubles to a 5 s cap, with ±20 % jitter so a fleet of
//! consumers does not reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    jitter: f64,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5), 0.2)
    }
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            initial,
            cap,
            jitter,
            current: initial,
        }
    }

    /// Next delay to sleep, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.cap);

        let jitter_span = base.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.001))
    }

    /// Reset after a successful operation.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
