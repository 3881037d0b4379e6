//! One side's resting orders at a single price
//!
//! Orders hang off a lock-free intrusive chain: insertion pushes at the head
//! with a CAS, matching walks the chain and fills oldest-first, and removal
//! is lazy. Terminal orders stay linked and are skipped by traversal; their
//! storage is reclaimed when the emptied level is pruned from the ladder and
//! dropped. Aggregates (total resting quantity, live order count) are
//! atomics that may over-approximate briefly under contention and converge
//! once CAS retries drain.

use common::{Px, Qty, Side};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicUsize, Ordering};

use crate::BookError;
use crate::order::Order;

struct OrderNode {
    order: Order,
    /// Older neighbor in the chain; immutable once the node is linked
    next: *mut OrderNode,
}

/// Outcome of matching an incoming order against one level
#[derive(Debug, Default)]
pub struct LevelMatch {
    /// Quantity consumed from this level
    pub filled: Qty,
    /// Orders that contributed quantity
    pub touched: usize,
    /// Ids of orders touched, oldest first
    pub touched_ids: SmallVec<[u64; 8]>,
    /// Ids of orders this match drove to `Filled`
    pub filled_ids: SmallVec<[u64; 8]>,
}

/// FIFO price level with lock-free insertion and matching
pub struct PriceLevel {
    price: Px,
    head: AtomicPtr<OrderNode>,
    /// Resting units over live orders
    total_qty: AtomicI64,
    /// Live (active or partial) order count
    order_count: AtomicUsize,
}

// SAFETY: the chain is append-only while the level is shared; nodes are only
// freed in Drop, which requires exclusive ownership.
unsafe impl Send for PriceLevel {}
unsafe impl Sync for PriceLevel {}

impl PriceLevel {
    /// Empty level at `price`
    #[must_use]
    pub fn new(price: Px) -> Self {
        Self {
            price,
            head: AtomicPtr::new(std::ptr::null_mut()),
            total_qty: AtomicI64::new(0),
            order_count: AtomicUsize::new(0),
        }
    }

    /// Level price
    #[must_use]
    pub const fn price(&self) -> Px {
        self.price
    }

    /// Total resting quantity over live orders
    #[must_use]
    pub fn total_qty(&self) -> Qty {
        Qty::from_i64(self.total_qty.load(Ordering::Acquire))
    }

    /// Number of live orders
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.order_count.load(Ordering::Acquire)
    }

    /// True when no live order rests here
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order_count() == 0
    }

    /// Link a new order at the chain head and bump the aggregates
    ///
    /// # Errors
    /// [`BookError::PriceMismatch`] if the order was routed to the wrong
    /// level; the chain is untouched.
    pub fn add(&self, order: Order) -> Result<(), BookError> {
        if order.price() != self.price {
            return Err(BookError::PriceMismatch {
                expected: self.price,
                actual: order.price(),
            });
        }
        let quantity = order.remaining();
        let node = Box::into_raw(Box::new(OrderNode {
            order,
            next: std::ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: node is exclusively ours until the CAS below publishes it.
            unsafe {
                (*node).next = head;
            }
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        self.total_qty.fetch_add(quantity.as_i64(), Ordering::AcqRel);
        self.order_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Match up to `quantity` against resting orders of the side opposite to
    /// `incoming_side`, honoring price-time priority
    ///
    /// Insertion is at the head, so the walk first collects the chain and
    /// then fills in reverse order: oldest resting order first. Terminal
    /// orders are skipped, not unlinked.
    #[must_use]
    pub fn match_incoming(&self, incoming_side: Side, quantity: Qty) -> LevelMatch {
        let mut result = LevelMatch::default();
        if !quantity.is_positive() {
            return result;
        }

        let chain: SmallVec<[*mut OrderNode; 32]> = self.collect_chain();
        let mut remaining = quantity;

        for &node in chain.iter().rev() {
            if !remaining.is_positive() {
                break;
            }
            // SAFETY: nodes stay allocated for the level's lifetime.
            let order = unsafe { &(*node).order };
            if order.side() == incoming_side || !order.status().is_live() {
                continue;
            }
            let outcome = order.try_fill(remaining);
            if outcome.filled.is_positive() {
                remaining = remaining.saturating_sub(outcome.filled);
                self.total_qty
                    .fetch_sub(outcome.filled.as_i64(), Ordering::AcqRel);
                result.touched += 1;
                result.touched_ids.push(order.id());
                if outcome.filled_order {
                    self.order_count.fetch_sub(1, Ordering::AcqRel);
                    result.filled_ids.push(order.id());
                }
            }
        }

        result.filled = quantity.saturating_sub(remaining);
        result
    }

    /// Cancel a resting order by id, returning its unfilled remainder
    ///
    /// Linear scan; cancellations are rare relative to matches and bounded
    /// by level depth. `None` when the id is absent or already terminal.
    pub fn cancel(&self, order_id: u64) -> Option<Qty> {
        let mut node = self.head.load(Ordering::Acquire);
        while !node.is_null() {
            // SAFETY: nodes stay allocated for the level's lifetime.
            let order = unsafe { &(*node).order };
            if order.id() == order_id {
                let remainder = order.cancel()?;
                self.total_qty
                    .fetch_sub(remainder.as_i64(), Ordering::AcqRel);
                self.order_count.fetch_sub(1, Ordering::AcqRel);
                return Some(remainder);
            }
            node = unsafe { (*node).next };
        }
        None
    }

    /// Find a resting order by id
    #[must_use]
    pub fn find(&self, order_id: u64) -> Option<&Order> {
        let mut node = self.head.load(Ordering::Acquire);
        while !node.is_null() {
            // SAFETY: nodes stay allocated for the level's lifetime; the
            // borrow is tied to &self.
            let order = unsafe { &(*node).order };
            if order.id() == order_id {
                return Some(order);
            }
            node = unsafe { (*node).next };
        }
        None
    }

    fn collect_chain(&self) -> SmallVec<[*mut OrderNode; 32]> {
        let mut chain = SmallVec::new();
        let mut node = self.head.load(Ordering::Acquire);
        while !node.is_null() {
            chain.push(node);
            // SAFETY: next pointers are immutable after publication.
            node = unsafe { (*node).next };
        }
        chain
    }
}

impl Drop for PriceLevel {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            // SAFETY: exclusive ownership in Drop; each node is freed once.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
        }
    }
}
