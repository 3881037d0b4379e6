//! Lock-free event bus for the `ReplayQ` backtesting engine
//!
//! The bus moves pooled events between the data feed, the dispatch loop and
//! the execution layer. The default backend is a Disruptor-style ring buffer
//! ([`ring::RingBuffer`]) coordinated by cache-padded sequences and a
//! pluggable wait strategy; a bounded channel fallback keeps the same
//! operation contracts when the ring is disabled, yielding FIFO-per-producer
//! ordering only.
//!
//! Events never travel by value: producers acquire storage from the
//! [`pool::EventPool`], publish the resulting handle, and the consumer takes
//! the payload back out of the pool, recycling the cell.

#![deny(clippy::all)]
#![deny(missing_docs)]

pub mod event;
pub mod pool;
pub mod ring;
pub mod sequence;
pub mod wait;

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};

pub use event::{Event, EventHeader, EventKind, FillEvent, MarketBarEvent, SignalEvent, SignalKind};
pub use pool::{EventHandle, EventPool, EventPoolConfig, TypedPool};
pub use ring::RingBuffer;
pub use sequence::{INITIAL_SEQUENCE, Sequence, SequenceBarrier};
pub use wait::{
    BlockingWait, BusySpinWait, SleepingWait, WaitStrategy, WaitStrategyKind, YieldingWait,
    create_wait_strategy,
};

/// Bus construction parameters
///
/// Invalid values are normalized at construction and the substitution is
/// logged, mirroring the validation policy of the rest of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Ring capacity; rounded up to a power of two, minimum 2
    pub capacity: usize,
    /// Consumer wait policy
    pub wait_strategy: WaitStrategyKind,
    /// Allow concurrent publishers
    pub multi_producer: bool,
    /// Allow competing consumers
    pub multi_consumer: bool,
    /// Use the ring buffer backend; `false` selects the channel fallback
    pub use_ring: bool,
    /// Event pool sizing
    pub pool: EventPoolConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 1 << 20,
            wait_strategy: WaitStrategyKind::default(),
            multi_producer: false,
            multi_consumer: false,
            use_ring: true,
            pool: EventPoolConfig::default(),
        }
    }
}

impl BusConfig {
    /// Normalize the configuration, substituting documented defaults for
    /// invalid values
    #[must_use]
    pub fn validated(mut self) -> Self {
        let normalized = self.capacity.next_power_of_two().max(2);
        if normalized != self.capacity {
            tracing::warn!(
                requested = self.capacity,
                normalized,
                "bus capacity rounded up to a power of two"
            );
            self.capacity = normalized;
        }
        self
    }
}

enum Backend {
    Ring(RingBuffer),
    Fifo {
        tx: Sender<u64>,
        rx: Receiver<u64>,
    },
}

/// Uniform enqueue/dequeue façade over the ring buffer or the FIFO fallback
pub struct EventBus {
    backend: Backend,
    capacity: usize,
}

impl EventBus {
    /// Build a bus from `config`
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let config = config.validated();
        let backend = if config.use_ring {
            Backend::Ring(RingBuffer::new(
                config.capacity,
                create_wait_strategy(config.wait_strategy),
                config.multi_producer,
                config.multi_consumer,
            ))
        } else {
            let (tx, rx) = bounded(config.capacity);
            Backend::Fifo { tx, rx }
        };
        Self {
            backend,
            capacity: config.capacity,
        }
    }

    /// Enqueue a handle, returning `false` when the bus is full
    #[must_use]
    pub fn try_publish(&self, handle: EventHandle) -> bool {
        match &self.backend {
            Backend::Ring(ring) => ring.try_publish(handle.pack()),
            Backend::Fifo { tx, .. } => match tx.try_send(handle.pack()) {
                Ok(()) => true,
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
            },
        }
    }

    /// Enqueue a handle, blocking under backpressure
    pub fn publish(&self, handle: EventHandle) {
        match &self.backend {
            Backend::Ring(ring) => ring.publish(handle.pack()),
            Backend::Fifo { tx, .. } => {
                // The bus owns the receiving side, so the channel cannot
                // disconnect while we are alive.
                let _ = tx.send(handle.pack());
            }
        }
    }

    /// Dequeue the next handle without blocking
    #[must_use]
    pub fn try_consume(&self) -> Option<EventHandle> {
        match &self.backend {
            Backend::Ring(ring) => ring.try_consume().and_then(EventHandle::unpack),
            Backend::Fifo { rx, .. } => rx.try_recv().ok().and_then(EventHandle::unpack),
        }
    }

    /// Dequeue the next handle, blocking at the wait strategy until one is
    /// published. `None` only if the fallback channel has disconnected.
    #[must_use]
    pub fn consume(&self) -> Option<EventHandle> {
        match &self.backend {
            Backend::Ring(ring) => EventHandle::unpack(ring.consume()),
            Backend::Fifo { rx, .. } => rx.recv().ok().and_then(EventHandle::unpack),
        }
    }

    /// True when no published events remain unconsumed
    #[must_use]
    pub fn empty(&self) -> bool {
        match &self.backend {
            Backend::Ring(ring) => ring.empty(),
            Backend::Fifo { rx, .. } => rx.is_empty(),
        }
    }

    /// Approximate number of unconsumed events
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.backend {
            Backend::Ring(ring) => ring.size(),
            Backend::Fifo { rx, .. } => rx.len(),
        }
    }

    /// Maximum number of in-flight events
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Producer cursor, `-1` before the first publish (ring backend only)
    #[must_use]
    pub fn cursor_sequence(&self) -> i64 {
        match &self.backend {
            Backend::Ring(ring) => ring.cursor_sequence(),
            Backend::Fifo { .. } => INITIAL_SEQUENCE,
        }
    }

    /// Consumer sequence, `-1` before the first consume (ring backend only)
    #[must_use]
    pub fn consumer_sequence(&self) -> i64 {
        match &self.backend {
            Backend::Ring(ring) => ring.consumer_sequence(),
            Backend::Fifo { .. } => INITIAL_SEQUENCE,
        }
    }
}
