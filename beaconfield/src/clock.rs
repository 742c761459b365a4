//! Injected time and idle sources.
//!
//! Nothing in the crate reads the wall clock directly; timestamps, TTLs and
//! cooldowns all go through a [`Clock`], and the scheduler asks an
//! [`IdleSignal`] before it spends CPU on analysis.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Milliseconds since construction, backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock for tests and hosts that own their frame time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Rc<Self> {
        Rc::new(ManualClock { now: Cell::new(start_ms) })
    }
    pub fn set(&self, ms: f64) {
        self.now.set(ms);
    }
    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// Reports whether the host render pipeline currently has a frame gap.
pub trait IdleSignal {
    fn is_idle(&self) -> bool;
}

impl<F: Fn() -> bool> IdleSignal for F {
    fn is_idle(&self) -> bool {
        self()
    }
}

impl IdleSignal for bool {
    fn is_idle(&self) -> bool {
        *self
    }
}
