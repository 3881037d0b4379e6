//! Disruptor-style lock-free ring buffer
//!
//! A fixed power-of-two array of slots coordinated by monotonic sequences.
//! Producers claim a sequence, write the slot, then publish; consumers wait
//! on a [`SequenceBarrier`] and advance their own sequence after reading.
//!
//! Publish marker design:
//! - **Single producer**: the cursor itself is the published marker. The
//!   producer writes the slot with release semantics and then store-releases
//!   the cursor, so a consumer that observes the cursor observes the slot.
//! - **Multi producer**: the cursor is only a claim counter advanced by CAS.
//!   Each producer publishes through a per-slot availability table; the
//!   consumer clamps the barrier's answer to the highest contiguous published
//!   sequence.
//!
//! Slots carry packed 64-bit event tokens (see [`crate::pool`]); `0` is the
//! reserved empty sentinel, so no pointers ever cross the buffer.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::sequence::{Sequence, SequenceBarrier};
use crate::wait::WaitStrategy;

/// Reserved token meaning "slot not published"
pub const EMPTY_SLOT: u64 = 0;

/// Lock-free ring buffer moving packed event tokens between threads
pub struct RingBuffer {
    mask: i64,
    capacity: usize,
    slots: Box<[AtomicU64]>,
    /// Published marker (single producer) or claim counter (multi producer)
    cursor: Arc<Sequence>,
    /// Per-slot published sequence, multi-producer mode only
    available: Option<Box<[AtomicI64]>>,
    consumer: Arc<Sequence>,
    barrier: SequenceBarrier,
    wait: Box<dyn WaitStrategy>,
    /// Serializes competing consumers; `None` in single-consumer mode
    consume_lock: Option<Mutex<()>>,
}

impl RingBuffer {
    /// Create a ring with `capacity` slots (rounded up to a power of two,
    /// minimum 2) and the given coordination policy
    #[must_use]
    pub fn new(
        capacity: usize,
        wait: Box<dyn WaitStrategy>,
        multi_producer: bool,
        multi_consumer: bool,
    ) -> Self {
        let capacity = capacity.next_power_of_two().max(2);
        let slots = (0..capacity)
            .map(|_| AtomicU64::new(EMPTY_SLOT))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let available = multi_producer.then(|| {
            (0..capacity)
                .map(|_| AtomicI64::new(-1))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        let cursor = Arc::new(Sequence::default());
        let consumer = Arc::new(Sequence::default());
        let barrier = SequenceBarrier::new(Arc::clone(&cursor));
        Self {
            mask: capacity as i64 - 1,
            capacity,
            slots,
            cursor,
            available,
            consumer,
            barrier,
            wait,
            consume_lock: multi_consumer.then(Mutex::default),
        }
    }

    #[inline]
    #[allow(clippy::cast_sign_loss)]
    fn index(&self, sequence: i64) -> usize {
        (sequence & self.mask) as usize
    }

    /// Claim the next sequence, write the token, publish. Returns `false`
    /// when the claim would lap the slowest consumer.
    pub fn try_publish(&self, token: u64) -> bool {
        debug_assert_ne!(token, EMPTY_SLOT, "empty sentinel is not publishable");
        match &self.available {
            None => self.try_publish_single(token),
            Some(_) => self.try_publish_multi(token),
        }
    }

    fn try_publish_single(&self, token: u64) -> bool {
        let next = self.cursor.get_relaxed() + 1;
        if next - self.capacity as i64 > self.consumer.get() {
            return false;
        }
        self.slots[self.index(next)].store(token, Ordering::Release);
        self.cursor.set(next);
        true
    }

    fn try_publish_multi(&self, token: u64) -> bool {
        let next = loop {
            let current = self.cursor.get();
            let next = current + 1;
            if next - self.capacity as i64 > self.consumer.get() {
                return false;
            }
            if self.cursor.compare_and_set(current, next) {
                break next;
            }
        };
        self.slots[self.index(next)].store(token, Ordering::Release);
        if let Some(table) = &self.available {
            table[self.index(next)].store(next, Ordering::Release);
        }
        true
    }

    /// Blocking publish: retries with a brief yield until space frees up,
    /// then signals any parked consumers
    pub fn publish(&self, token: u64) {
        while !self.try_publish(token) {
            std::thread::yield_now();
        }
        self.wait.signal_all();
    }

    /// Non-blocking consume: the next token if published, `None` otherwise
    #[must_use]
    pub fn try_consume(&self) -> Option<u64> {
        match &self.consume_lock {
            Some(lock) => {
                let _guard = lock.lock();
                self.try_consume_inner()
            }
            None => self.try_consume_inner(),
        }
    }

    fn try_consume_inner(&self) -> Option<u64> {
        let next = self.consumer.get_relaxed() + 1;
        let mut available = self.barrier.try_wait_for(next);
        if available < next {
            return None;
        }
        available = self.highest_published(next, available);
        if available < next {
            return None;
        }
        Some(self.read_slot(next))
    }

    /// Blocking consume via the configured wait strategy
    #[must_use]
    pub fn consume(&self) -> u64 {
        match &self.consume_lock {
            Some(lock) => {
                let _guard = lock.lock();
                self.consume_inner()
            }
            None => self.consume_inner(),
        }
    }

    fn consume_inner(&self) -> u64 {
        let next = self.consumer.get_relaxed() + 1;
        loop {
            let available = self.wait.wait_for(next, &self.barrier);
            // In multi-producer mode a sequence can be claimed but not yet
            // published; spin until the gap closes.
            if self.highest_published(next, available) >= next {
                break;
            }
            std::hint::spin_loop();
        }
        self.read_slot(next)
    }

    fn read_slot(&self, sequence: i64) -> u64 {
        let token = self.slots[self.index(sequence)].swap(EMPTY_SLOT, Ordering::AcqRel);
        debug_assert_ne!(token, EMPTY_SLOT, "consumed an unpublished slot");
        self.consumer.set(sequence);
        token
    }

    /// Highest contiguous published sequence in `[from, to]`
    fn highest_published(&self, from: i64, to: i64) -> i64 {
        match &self.available {
            None => to,
            Some(table) => {
                let mut sequence = from;
                while sequence <= to {
                    if table[self.index(sequence)].load(Ordering::Acquire) != sequence {
                        return sequence - 1;
                    }
                    sequence += 1;
                }
                to
            }
        }
    }

    /// True when no published events remain unconsumed
    #[must_use]
    pub fn empty(&self) -> bool {
        self.consumer.get() >= self.cursor.get()
    }

    /// Approximate number of unconsumed events
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn size(&self) -> usize {
        (self.cursor.get() - self.consumer.get()).max(0) as usize
    }

    /// Slot capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest claimed producer sequence
    #[must_use]
    pub fn cursor_sequence(&self) -> i64 {
        self.cursor.get()
    }

    /// Highest fully processed consumer sequence
    #[must_use]
    pub fn consumer_sequence(&self) -> i64 {
        self.consumer.get()
    }
}
