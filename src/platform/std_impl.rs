//! Standard library implementation of the platform traits.

use std::time::{Duration, Instant};

use super::TimeProvider;

/// Time provider using std::time.
pub struct StdTimeProvider {
    /// Reference instant for monotonic readings
    epoch: Instant,
}

impl StdTimeProvider {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for StdTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for StdTimeProvider {
    fn monotonic_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
