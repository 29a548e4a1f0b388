//! Minimum spacing between case launches.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct LaunchThrottle {
    min_interval: Duration,
    last_launch: Option<Instant>,
}

impl LaunchThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_launch: None,
        }
    }

    /// Time left before the next launch is allowed.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        match self.last_launch {
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    pub fn mark_launch(&mut self, at: Instant) {
        self.last_launch = Some(at);
    }
}
