//! Atomic `f64` built on bit-cast compare-and-swap
//!
//! Rust has no native atomic floating point type, so monetary aggregates are
//! stored as `AtomicU64` holding the IEEE-754 bit pattern. Read-modify-write
//! operations loop on `compare_exchange_weak` with acquire/release ordering.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free `f64` cell for portfolio and statistics aggregates
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Create a new cell holding `value`
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    /// Read the current value with acquire ordering
    #[must_use]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Write `value` with release ordering
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Replace the value, returning the previous one
    pub fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.bits.swap(value.to_bits(), Ordering::AcqRel))
    }

    /// Atomically add `delta`, returning the new value
    pub fn fetch_add(&self, delta: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let new = f64::from_bits(current) + delta;
            match self.bits.compare_exchange_weak(
                current,
                new.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return new,
                Err(observed) => current = observed,
            }
        }
    }

    /// Atomically raise the value to at least `candidate`, returning the new maximum
    pub fn fetch_max(&self, candidate: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let value = f64::from_bits(current);
            if candidate <= value {
                return value;
            }
            match self.bits.compare_exchange_weak(
                current,
                candidate.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }

    /// Compare-and-swap on the exact bit pattern of `expected`
    ///
    /// # Errors
    /// Returns the observed value when it differs from `expected`.
    pub fn compare_exchange(&self, expected: f64, new: f64) -> Result<f64, f64> {
        self.bits
            .compare_exchange(
                expected.to_bits(),
                new.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(f64::from_bits)
            .map_err(f64::from_bits)
    }
}
