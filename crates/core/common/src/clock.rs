//! Engine clock
//!
//! A `Clock` is created once at engine construction and passed by reference
//! to the components that stamp events. It pairs a wall-clock origin with a
//! monotonic origin so event headers carry both a real timestamp and a
//! monotone nanosecond counter that never goes backwards.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::types::Ts;

/// Construction-time clock for event timestamping
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_origin_ns: u64,
    mono_origin: Instant,
}

impl Clock {
    /// Create a clock anchored at the current instant
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new() -> Self {
        let wall_origin_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self {
            wall_origin_ns,
            mono_origin: Instant::now(),
        }
    }

    /// Wall-clock nanoseconds since the UNIX epoch
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn wall_ns(&self) -> u64 {
        self.wall_origin_ns + self.mono_origin.elapsed().as_nanos() as u64
    }

    /// Monotonic nanoseconds since clock construction
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn mono_ns(&self) -> u64 {
        self.mono_origin.elapsed().as_nanos() as u64
    }

    /// Wall-clock timestamp
    #[must_use]
    pub fn now(&self) -> Ts {
        Ts::from_nanos(self.wall_ns())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let clock = Clock::new();
        let a = clock.mono_ns();
        let b = clock.mono_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_wall_tracks_mono() {
        let clock = Clock::new();
        let wall_a = clock.wall_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let wall_b = clock.wall_ns();
        assert!(wall_b > wall_a);
    }
}
