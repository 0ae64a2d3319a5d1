use std::{cell::Cell, time::Duration};

use nix::time::{clock_gettime, ClockId};
use tracing::warn;

/// Source of the current time, in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// `CLOCK_MONOTONIC`, unaffected by wall clock adjustments during a run.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Cell<f64>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => {
                let now = Duration::from(ts).as_secs_f64();
                self.last.set(now);
                now
            }
            // Never seen in practice; repeat the last reading
            Err(err) => {
                warn!("clock_gettime(CLOCK_MONOTONIC): {}", err);
                self.last.get()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn monotonic_never_goes_back() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(a > 0.0);
        assert!(b >= a);
    }
}
