//! Time source used by the depth cache.
//!
//! Timestamps are seconds since the UNIX epoch with a fractional part.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Port for reading the current time, so staleness can be tested
/// deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, secs: f64) {
        *self.now.lock() = secs;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(100.0);
        let other = clock.clone();
        clock.advance(2.5);
        assert_eq!(other.now(), 102.5);
        other.set(7.0);
        assert_eq!(clock.now(), 7.0);
    }

    #[test]
    fn system_clock_is_past_epoch() {
        assert!(SystemClock.now() > 1_600_000_000.0);
    }
}
