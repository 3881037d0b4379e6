//! Resting orders and the CAS fill primitive

use common::{Px, Qty, Side, Symbol};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

/// Lifecycle of a resting order
///
/// Transitions: `Active -> {Partial, Filled, Cancelled}`,
/// `Partial -> {Filled, Cancelled}`. `Filled` and `Cancelled` are terminal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Resting, untouched
    Active = 0,
    /// Partially filled, quantity remains
    Partial = 1,
    /// Fully filled
    Filled = 2,
    /// Cancelled; any unfilled remainder is void
    Cancelled = 3,
}

impl OrderStatus {
    fn from_u8(tag: u8) -> Self {
        match tag {
            0 => Self::Active,
            1 => Self::Partial,
            2 => Self::Filled,
            _ => Self::Cancelled,
        }
    }

    /// True while the order can still trade
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Partial)
    }
}

/// Result of one [`Order::try_fill`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    /// Quantity actually taken from the order
    pub filled: Qty,
    /// True when this call drove the order to `Filled`
    pub filled_order: bool,
}

impl FillOutcome {
    const NONE: Self = Self {
        filled: Qty::ZERO,
        filled_order: false,
    };
}

/// One resting limit order
///
/// `remaining` and `status` are atomics so matching and cancellation race
/// safely without locks; everything else is immutable after insertion.
#[derive(Debug)]
pub struct Order {
    id: u64,
    symbol: Symbol,
    side: Side,
    price: Px,
    original: Qty,
    remaining: AtomicI64,
    status: AtomicU8,
    priority: u64,
}

impl Order {
    /// Create an active order. `priority` is a strictly monotone insertion
    /// counter; lower values match first at equal prices.
    #[must_use]
    pub fn new(id: u64, symbol: Symbol, side: Side, price: Px, quantity: Qty, priority: u64) -> Self {
        Self {
            id,
            symbol,
            side,
            price,
            original: quantity,
            remaining: AtomicI64::new(quantity.as_i64()),
            status: AtomicU8::new(OrderStatus::Active as u8),
            priority,
        }
    }

    /// Order id
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Instrument
    #[must_use]
    pub const fn symbol(&self) -> Symbol {
        self.symbol
    }

    /// Side of the book this order rests on
    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    /// Limit price, tick-rounded
    #[must_use]
    pub const fn price(&self) -> Px {
        self.price
    }

    /// Quantity at insertion
    #[must_use]
    pub const fn original(&self) -> Qty {
        self.original
    }

    /// Unfilled quantity
    #[must_use]
    pub fn remaining(&self) -> Qty {
        Qty::from_i64(self.remaining.load(Ordering::Acquire))
    }

    /// Current lifecycle state
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        OrderStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Insertion priority
    #[must_use]
    pub const fn priority(&self) -> u64 {
        self.priority
    }

    /// Atomically take up to `requested` from the remaining quantity
    ///
    /// Reads remaining, computes `fill = min(remaining, requested)`, and CAS
    /// swaps it down; on contention it re-reads and retries. The caller that
    /// drives remaining to zero transitions the status to `Filled` and is
    /// told so via [`FillOutcome::filled_order`], keeping order-count
    /// accounting exactly-once under concurrent matching.
    pub fn try_fill(&self, requested: Qty) -> FillOutcome {
        if !requested.is_positive() {
            return FillOutcome::NONE;
        }
        loop {
            if !self.status().is_live() {
                return FillOutcome::NONE;
            }
            let remaining = self.remaining.load(Ordering::Acquire);
            if remaining <= 0 {
                return FillOutcome::NONE;
            }
            let fill = remaining.min(requested.as_i64());
            if self
                .remaining
                .compare_exchange_weak(
                    remaining,
                    remaining - fill,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                let exhausted = remaining == fill;
                let filled_order = if exhausted {
                    self.transition_live_to(OrderStatus::Filled)
                } else {
                    // Active -> Partial; losing to a concurrent Filled or
                    // Cancelled transition is fine.
                    let _ = self.status.compare_exchange(
                        OrderStatus::Active as u8,
                        OrderStatus::Partial as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    false
                };
                return FillOutcome {
                    filled: Qty::from_i64(fill),
                    filled_order,
                };
            }
            std::hint::spin_loop();
        }
    }

    /// Cancel the order, returning the quantity that was still resting
    ///
    /// `None` when the order already reached a terminal state. The remainder
    /// is swapped to zero after the status flips, so any fill attempt that
    /// starts after `cancel` returns observes nothing left to take.
    pub fn cancel(&self) -> Option<Qty> {
        if !self.transition_live_to(OrderStatus::Cancelled) {
            return None;
        }
        let remainder = self.remaining.swap(0, Ordering::AcqRel);
        Some(Qty::from_i64(remainder))
    }

    /// CAS the status from a live state to `target`; false if a terminal
    /// state won the race
    fn transition_live_to(&self, target: OrderStatus) -> bool {
        loop {
            let current = self.status.load(Ordering::Acquire);
            if !OrderStatus::from_u8(current).is_live() {
                return false;
            }
            if self
                .status
                .compare_exchange_weak(
                    current,
                    target as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn order(qty: f64) -> Order {
        Order::new(1, Symbol::new(1), Side::Sell, Px::new(100.0), Qty::new(qty), 0)
    }

    #[test]
    fn test_partial_then_full_fill() {
        let o = order(100.0);
        let first = o.try_fill(Qty::new(30.0));
        assert_eq!(first.filled, Qty::new(30.0));
        assert!(!first.filled_order);
        assert_eq!(o.status(), OrderStatus::Partial);
        assert_eq!(o.remaining(), Qty::new(70.0));

        let second = o.try_fill(Qty::new(200.0));
        assert_eq!(second.filled, Qty::new(70.0));
        assert!(second.filled_order);
        assert_eq!(o.status(), OrderStatus::Filled);
        assert!(o.remaining().is_zero());

        // Terminal: nothing more to take.
        assert_eq!(o.try_fill(Qty::new(1.0)), FillOutcome::NONE);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let o = order(50.0);
        assert_eq!(o.cancel(), Some(Qty::new(50.0)));
        assert_eq!(o.status(), OrderStatus::Cancelled);
        assert_eq!(o.cancel(), None);
        assert_eq!(o.try_fill(Qty::new(10.0)), FillOutcome::NONE);
    }

    #[test]
    fn test_cancel_after_partial_returns_remainder() {
        let o = order(100.0);
        let _ = o.try_fill(Qty::new(40.0));
        assert_eq!(o.cancel(), Some(Qty::new(60.0)));
        assert!(o.remaining().is_zero());
    }

    #[test]
    fn test_concurrent_fills_never_oversubscribe() {
        let o = Arc::new(order(1000.0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let o = Arc::clone(&o);
            handles.push(thread::spawn(move || {
                let mut taken = 0i64;
                for _ in 0..50 {
                    taken += o.try_fill(Qty::new(5.0)).filled.as_i64();
                }
                taken
            }));
        }
        let total: i64 = handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .sum();
        assert_eq!(total, Qty::new(1000.0).as_i64());
        assert_eq!(o.status(), OrderStatus::Filled);
        assert!(o.remaining().is_zero());
    }
}
