//! Consumer wait strategies
//!
//! Four policies trade latency against CPU burn. All of them answer
//! `wait_for(sequence, barrier)` with the highest available sequence once it
//! reaches `sequence`; only the blocking variant needs `signal_all` from the
//! producer side.
//!
//! | Strategy | Latency | CPU | Suspension |
//! |---|---|---|---|
//! | [`BusySpinWait`] | lowest | 100% | never |
//! | [`YieldingWait`] | low | moderate | yields after a spin budget |
//! | [`SleepingWait`] | medium | low | spin, yield, then backoff sleep |
//! | [`BlockingWait`] | highest | minimal | condition variable |

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sequence::SequenceBarrier;

/// Configuration tag selecting a wait strategy
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategyKind {
    /// Busy-spin with the architectural pause hint
    Busy,
    /// Spin briefly, then yield the thread
    #[default]
    Yield,
    /// Spin, yield, then sleep with exponential backoff
    Sleep,
    /// Park on a condition variable until signalled
    Block,
}

/// Policy by which a consumer waits for an unpublished sequence
pub trait WaitStrategy: Send + Sync {
    /// Wait until `sequence` is available and return the highest available
    /// sequence reported by the barrier
    fn wait_for(&self, sequence: i64, barrier: &SequenceBarrier) -> i64;

    /// Wake any parked consumers; a no-op for non-blocking strategies
    fn signal_all(&self) {}
}

/// Build the wait strategy selected by `kind`
#[must_use]
pub fn create_wait_strategy(kind: WaitStrategyKind) -> Box<dyn WaitStrategy> {
    match kind {
        WaitStrategyKind::Busy => Box::new(BusySpinWait),
        WaitStrategyKind::Yield => Box::new(YieldingWait::default()),
        WaitStrategyKind::Sleep => Box::new(SleepingWait::default()),
        WaitStrategyKind::Block => Box::new(BlockingWait::default()),
    }
}

/// Lowest latency, burns a full core while waiting
#[derive(Debug, Default)]
pub struct BusySpinWait;

impl WaitStrategy for BusySpinWait {
    fn wait_for(&self, sequence: i64, barrier: &SequenceBarrier) -> i64 {
        loop {
            let available = barrier.try_wait_for(sequence);
            if available >= sequence {
                return available;
            }
            std::hint::spin_loop();
        }
    }
}

/// Spins for a bounded budget, then yields to the scheduler
#[derive(Debug)]
pub struct YieldingWait {
    spin_tries: u32,
}

impl YieldingWait {
    /// Yielding strategy with an explicit spin budget
    #[must_use]
    pub const fn new(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl Default for YieldingWait {
    fn default() -> Self {
        Self::new(100)
    }
}

impl WaitStrategy for YieldingWait {
    fn wait_for(&self, sequence: i64, barrier: &SequenceBarrier) -> i64 {
        let mut counter = self.spin_tries;
        loop {
            let available = barrier.try_wait_for(sequence);
            if available >= sequence {
                return available;
            }
            if counter > 0 {
                counter -= 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }
}

/// Progressive spin, yield, then doubling sleep up to a cap
#[derive(Debug)]
pub struct SleepingWait {
    spin_tries: u32,
    yield_tries: u32,
    min_sleep: Duration,
    max_sleep: Duration,
}

impl SleepingWait {
    /// Sleeping strategy with explicit phase budgets
    #[must_use]
    pub const fn new(
        spin_tries: u32,
        yield_tries: u32,
        min_sleep: Duration,
        max_sleep: Duration,
    ) -> Self {
        Self {
            spin_tries,
            yield_tries,
            min_sleep,
            max_sleep,
        }
    }
}

impl Default for SleepingWait {
    fn default() -> Self {
        Self::new(
            200,
            100,
            Duration::from_micros(1),
            Duration::from_millis(1),
        )
    }
}

impl WaitStrategy for SleepingWait {
    fn wait_for(&self, sequence: i64, barrier: &SequenceBarrier) -> i64 {
        let mut spin_counter = self.spin_tries;
        let mut yield_counter = self.yield_tries;
        let mut sleep = self.min_sleep;
        loop {
            let available = barrier.try_wait_for(sequence);
            if available >= sequence {
                return available;
            }
            if spin_counter > 0 {
                spin_counter -= 1;
                std::hint::spin_loop();
            } else if yield_counter > 0 {
                yield_counter -= 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(sleep);
                sleep = (sleep * 2).min(self.max_sleep);
            }
        }
    }
}

/// Parks on a condition variable; producers must call `signal_all`
///
/// The wait re-checks availability on a bounded timeout so a signal racing
/// ahead of the park can never strand the consumer.
#[derive(Debug, Default)]
pub struct BlockingWait {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl WaitStrategy for BlockingWait {
    fn wait_for(&self, sequence: i64, barrier: &SequenceBarrier) -> i64 {
        // Fast path without taking the lock.
        let available = barrier.try_wait_for(sequence);
        if available >= sequence {
            return available;
        }

        let mut guard = self.mutex.lock();
        loop {
            let available = barrier.try_wait_for(sequence);
            if available >= sequence {
                return available;
            }
            let _ = self
                .condvar
                .wait_for(&mut guard, Duration::from_millis(50));
        }
    }

    fn signal_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}
