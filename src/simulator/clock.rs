//! Simulated clock. Advances by tick interval times speedup, so it runs
//! ahead of wall time when the simulation is compressed.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimClock {
    pub current_time: Duration,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            current_time: Duration::from_secs(0),
        }
    }

    pub fn advance(&mut self, dt: Duration) {
        self.current_time += dt;
    }

    /// Protocol `eventtime`: simulated seconds since start.
    pub fn seconds(&self) -> f64 {
        self.current_time.as_secs_f64()
    }
}

/// Simulated time covered by one tick of `interval` wall time.
pub fn scaled_step(interval: Duration, speedup: f64) -> Duration {
    interval.mul_f64(speedup.max(0.0))
}
