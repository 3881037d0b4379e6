//! Lock-free sequence counters and dependency barriers
//!
//! Sequences coordinate producers and consumers around the ring buffer. Each
//! one lives on its own cache line so hot producer and consumer counters do
//! not false-share.

use crossbeam_utils::CachePadded;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Initial value of every sequence: nothing claimed, nothing consumed
pub const INITIAL_SEQUENCE: i64 = -1;

/// Cache-line padded monotonic sequence counter
#[derive(Debug)]
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    /// Create a sequence starting at `initial`
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial)),
        }
    }

    /// Current value with acquire ordering
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Current value with relaxed ordering, for tight polling loops
    #[must_use]
    pub fn get_relaxed(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Store `next` with release ordering
    pub fn set(&self, next: i64) {
        self.value.store(next, Ordering::Release);
    }

    /// Atomically add `delta` and return the new value
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Compare-and-set with acquire/release semantics
    #[must_use]
    pub fn compare_and_set(&self, expected: i64, next: i64) -> bool {
        self.value
            .compare_exchange_weak(expected, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_SEQUENCE)
    }
}

/// Read-side observer of a producer cursor and optional dependency sequences
///
/// `wait_for(n)` answers the greatest sequence `s` with `s >= n`,
/// `s <= cursor` and `s <= min(dependencies)`. Consumers chained behind other
/// consumers register those upstream sequences as dependencies.
#[derive(Debug)]
pub struct SequenceBarrier {
    cursor: Arc<Sequence>,
    dependencies: Vec<Arc<Sequence>>,
}

impl SequenceBarrier {
    /// Barrier over a bare producer cursor
    #[must_use]
    pub fn new(cursor: Arc<Sequence>) -> Self {
        Self {
            cursor,
            dependencies: Vec::new(),
        }
    }

    /// Barrier over a cursor plus upstream consumer sequences
    #[must_use]
    pub fn with_dependencies(cursor: Arc<Sequence>, dependencies: Vec<Arc<Sequence>>) -> Self {
        Self {
            cursor,
            dependencies,
        }
    }

    /// Highest published producer sequence
    #[must_use]
    pub fn cursor_sequence(&self) -> i64 {
        self.cursor.get()
    }

    /// Non-blocking availability check: the highest available sequence if it
    /// is at least `sequence`, otherwise `-1`
    #[must_use]
    pub fn try_wait_for(&self, sequence: i64) -> i64 {
        let available = self.cursor.get();
        if available < sequence {
            return -1;
        }
        self.minimum_dependency(available)
    }

    /// Block until `sequence` is available, spinning briefly before yielding
    #[must_use]
    pub fn wait_for(&self, sequence: i64) -> i64 {
        const SPIN_ITERATIONS: u32 = 100;

        let mut available = self.cursor.get();
        while available < sequence {
            for _ in 0..SPIN_ITERATIONS {
                available = self.cursor.get_relaxed();
                if available >= sequence {
                    break;
                }
                std::hint::spin_loop();
            }
            if available < sequence {
                std::thread::yield_now();
            }
            available = self.cursor.get();
        }
        self.minimum_dependency(available)
    }

    /// Clamp `available` to the slowest dependency sequence
    fn minimum_dependency(&self, available: i64) -> i64 {
        self.dependencies
            .iter()
            .map(|dep| dep.get())
            .fold(available, i64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sequence_starts_at_minus_one() {
        let seq = Sequence::default();
        assert_eq!(seq.get(), INITIAL_SEQUENCE);
    }

    #[test]
    fn test_add_and_get() {
        let seq = Sequence::default();
        assert_eq!(seq.add_and_get(1), 0);
        assert_eq!(seq.add_and_get(5), 5);
        assert_eq!(seq.get(), 5);
    }

    #[test]
    fn test_compare_and_set() {
        let seq = Sequence::new(3);
        // Weak CAS may fail spuriously; retry like real claim loops do.
        while !seq.compare_and_set(3, 4) {
            assert_eq!(seq.get(), 3);
        }
        assert_eq!(seq.get(), 4);
        assert!(!seq.compare_and_set(3, 9));
    }

    #[test]
    fn test_try_wait_for_unavailable() {
        let cursor = Arc::new(Sequence::default());
        let barrier = SequenceBarrier::new(Arc::clone(&cursor));
        assert_eq!(barrier.try_wait_for(0), -1);
        cursor.set(2);
        assert_eq!(barrier.try_wait_for(0), 2);
    }

    #[test]
    fn test_dependency_clamps_availability() {
        let cursor = Arc::new(Sequence::new(10));
        let upstream = Arc::new(Sequence::new(4));
        let barrier =
            SequenceBarrier::with_dependencies(Arc::clone(&cursor), vec![Arc::clone(&upstream)]);
        assert_eq!(barrier.try_wait_for(2), 4);
        upstream.set(9);
        assert_eq!(barrier.try_wait_for(2), 9);
    }

    #[test]
    fn test_wait_for_blocks_until_published() {
        let cursor = Arc::new(Sequence::default());
        let barrier = SequenceBarrier::new(Arc::clone(&cursor));

        let publisher = {
            let cursor = Arc::clone(&cursor);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                cursor.set(7);
            })
        };

        let available = barrier.wait_for(5);
        assert!(available >= 5);
        publisher.join().expect("publisher panicked");
    }
}
