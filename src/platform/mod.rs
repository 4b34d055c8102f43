//! Platform abstraction for time.
//!
//! The scheduler never reads a clock directly. It asks a [`TimeProvider`],
//! so hosts pick real time and tests drive time by hand.

use std::cell::Cell;
use std::rc::Rc;

mod std_impl;

pub use std_impl::StdTimeProvider;

/// Trait for providing time-related functionality.
pub trait TimeProvider {
    /// Milliseconds from a monotonic source. Only differences are meaningful.
    fn monotonic_millis(&self) -> u64;

    /// Block the host for `ms` milliseconds (used by the real-time loop).
    fn sleep(&self, ms: u64);
}

/// A hand-driven clock.
///
/// Clones share the same counter, so a test keeps one handle and gives the
/// other to the interpreter. `sleep` advances the counter instead of
/// blocking.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeProvider {
    now: Rc<Cell<u64>>,
}

impl ManualTimeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn get(&self) -> u64 {
        self.now.get()
    }
}

impl TimeProvider for ManualTimeProvider {
    fn monotonic_millis(&self) -> u64 {
        self.now.get()
    }

    fn sleep(&self, ms: u64) {
        self.advance(ms);
    }
}
