//! Per-symbol order book: sorted ladders, quote cache, matching
//!
//! Ladder maps are guarded by reader-writer locks and hold shared price
//! levels; everything inside a level is lock-free. Matching collects the
//! candidate levels under a read lock, releases it, then walks the levels in
//! priority order (asks ascending for incoming buys, bids descending for
//! incoming sells). Adds and pruning serialize on the ladder writer lock, so
//! a level can never be repopulated and pruned concurrently.

use common::{AtomicF64, Px, Qty, Side, Symbol, Ts};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crate::BookError;
use crate::order::{Order, OrderStatus};
use crate::price_level::PriceLevel;

/// Residuals below this are treated as fully filled
const FILL_EPSILON: f64 = 1e-8;

/// Namespace bit for internal replacement ids minted by `modify_order`
const SYNTHETIC_ID: u64 = 1 << 63;

/// Order book construction parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    /// Instrument this book belongs to
    pub symbol: Symbol,
    /// Minimum price increment; prices are rounded to this grid
    pub tick_size: f64,
    /// Levels per side reported by [`OrderBook::snapshot`]
    pub depth_levels: usize,
    /// Maintain matching statistics
    pub enable_statistics: bool,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            symbol: Symbol::new(0),
            tick_size: 0.01,
            depth_levels: 5,
            enable_statistics: false,
        }
    }
}

impl BookConfig {
    /// Normalize invalid fields to documented defaults, logging substitutions
    #[must_use]
    pub fn validated(mut self) -> Self {
        if !(self.tick_size.is_finite() && self.tick_size > 0.0) {
            tracing::warn!(tick_size = self.tick_size, "invalid tick size, using 0.01");
            self.tick_size = 0.01;
        }
        if self.depth_levels == 0 {
            tracing::warn!("depth_levels must be >= 1, using 5");
            self.depth_levels = 5;
        }
        self
    }
}

/// Result of a market or limit order match
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    /// Quantity consumed from the book
    pub matched_quantity: f64,
    /// Volume-weighted average execution price
    pub average_price: f64,
    /// Number of resting orders that contributed
    pub orders_matched: usize,
    /// Ids of the contributing orders, in match order
    pub matched_order_ids: Vec<u64>,
    /// True when the full requested quantity was matched
    pub fully_filled: bool,
}

impl MatchResult {
    /// Total notional value of the match
    #[must_use]
    pub fn total_value(&self) -> f64 {
        self.matched_quantity * self.average_price
    }
}

/// Aggregated state of one price on one side
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnapshotLevel {
    /// Level price
    pub price: f64,
    /// Total resting quantity
    pub quantity: f64,
    /// Live order count
    pub order_count: usize,
}

/// Top-of-book plus depth, safe to share across threads
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketSnapshot {
    /// Instrument
    pub symbol: Symbol,
    /// Best bid price, zero when the side is empty
    pub best_bid_price: f64,
    /// Best ask price, zero when the side is empty
    pub best_ask_price: f64,
    /// Quantity at the best bid
    pub best_bid_quantity: f64,
    /// Quantity at the best ask
    pub best_ask_quantity: f64,
    /// Snapshot wall-clock time
    pub ts: Ts,
    /// Bid levels, price descending
    pub bid_levels: Vec<SnapshotLevel>,
    /// Ask levels, price ascending
    pub ask_levels: Vec<SnapshotLevel>,
}

impl MarketSnapshot {
    /// Mid price, or zero without a two-sided market
    #[must_use]
    pub fn mid_price(&self) -> f64 {
        if self.best_bid_price > 0.0 && self.best_ask_price > 0.0 {
            (self.best_bid_price + self.best_ask_price) / 2.0
        } else {
            0.0
        }
    }

    /// Absolute bid-ask spread, or zero without a two-sided market
    #[must_use]
    pub fn spread(&self) -> f64 {
        if self.best_bid_price > 0.0 && self.best_ask_price > 0.0 {
            self.best_ask_price - self.best_bid_price
        } else {
            0.0
        }
    }

    /// Spread in basis points of the mid
    #[must_use]
    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid_price();
        if mid > 0.0 {
            self.spread() / mid * 10_000.0
        } else {
            0.0
        }
    }
}

/// Matching statistics, maintained when `enable_statistics` is set
#[derive(Debug, Default)]
struct BookStats {
    orders_added: AtomicU64,
    orders_cancelled: AtomicU64,
    orders_matched: AtomicU64,
    total_matches: AtomicU64,
    total_volume_matched: AtomicF64,
    total_value_matched: AtomicF64,
}

/// Point-in-time copy of the book statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BookStatsSnapshot {
    /// Orders accepted by `add_order`
    pub orders_added: u64,
    /// Orders cancelled
    pub orders_cancelled: u64,
    /// Resting orders fully filled by matching
    pub orders_matched: u64,
    /// Match operations that consumed quantity
    pub total_matches: u64,
    /// Total quantity matched
    pub total_volume_matched: f64,
    /// Total notional matched
    pub total_value_matched: f64,
}

struct OrderRef {
    side: Side,
    price_ticks: i64,
}

/// Price-time-priority order book for one symbol
pub struct OrderBook {
    config: BookConfig,
    /// Ladders keyed by price ticks; bids iterate descending, asks ascending
    bids: RwLock<BTreeMap<i64, Arc<PriceLevel>>>,
    asks: RwLock<BTreeMap<i64, Arc<PriceLevel>>>,
    /// Internal id -> side/price of the level holding the order
    lookup: RwLock<FxHashMap<u64, OrderRef>>,
    /// Caller id -> internal id, populated by `modify_order` replacements
    alias: RwLock<FxHashMap<u64, u64>>,
    next_internal_id: AtomicU64,
    next_priority: AtomicU64,
    cached_best_bid: AtomicI64,
    cached_best_ask: AtomicI64,
    cache_valid: AtomicBool,
    stats: BookStats,
}

impl OrderBook {
    /// Build a book from `config`
    #[must_use]
    pub fn new(config: BookConfig) -> Self {
        Self {
            config: config.validated(),
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            lookup: RwLock::new(FxHashMap::default()),
            alias: RwLock::new(FxHashMap::default()),
            next_internal_id: AtomicU64::new(1),
            next_priority: AtomicU64::new(0),
            cached_best_bid: AtomicI64::new(0),
            cached_best_ask: AtomicI64::new(0),
            cache_valid: AtomicBool::new(false),
            stats: BookStats::default(),
        }
    }

    /// Construction configuration
    #[must_use]
    pub const fn config(&self) -> &BookConfig {
        &self.config
    }

    /// Round a raw price onto the tick grid
    #[must_use]
    pub fn round_to_tick(&self, price: f64) -> Px {
        Px::new((price / self.config.tick_size).round() * self.config.tick_size)
    }

    /// Rest a new limit order
    ///
    /// # Errors
    /// Rejects non-positive price or quantity and duplicate ids without
    /// mutating the book.
    pub fn add_order(&self, id: u64, side: Side, price: f64, quantity: f64) -> Result<(), BookError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(BookError::InvalidQuantity { quantity });
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(BookError::InvalidPrice { price });
        }
        let internal = self.resolve(id);
        if self.lookup.read().contains_key(&internal) {
            return Err(BookError::DuplicateOrder { id });
        }

        let px = self.round_to_tick(price);
        let priority = self.next_priority.fetch_add(1, Ordering::Relaxed);
        let order = Order::new(internal, self.config.symbol, side, px, Qty::new(quantity), priority);
        self.add_to_level(side, px, order)?;

        self.lookup.write().insert(
            internal,
            OrderRef {
                side,
                price_ticks: px.as_i64(),
            },
        );
        self.invalidate_cache();
        if self.config.enable_statistics {
            self.stats.orders_added.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn add_to_level(&self, side: Side, px: Px, order: Order) -> Result<(), BookError> {
        // Held across get-or-create AND the chain insert so a concurrent
        // prune cannot drop a level that is being repopulated.
        let mut ladder = self.ladder(side).write();
        let level = ladder
            .entry(px.as_i64())
            .or_insert_with(|| Arc::new(PriceLevel::new(px)));
        level.add(order)
    }

    fn ladder(&self, side: Side) -> &RwLock<BTreeMap<i64, Arc<PriceLevel>>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn resolve(&self, caller_id: u64) -> u64 {
        self.alias.read().get(&caller_id).copied().unwrap_or(caller_id)
    }

    /// Match an incoming market order against the opposite ladder
    ///
    /// Walks asks ascending for buys and bids descending for sells,
    /// consuming quantity oldest-first within each level, stopping when the
    /// request is exhausted or the next level violates `limit_price`.
    #[must_use]
    pub fn match_market_order(
        &self,
        side: Side,
        quantity: f64,
        limit_price: Option<f64>,
    ) -> MatchResult {
        let mut result = MatchResult::default();
        if !(quantity.is_finite() && quantity > 0.0) {
            return result;
        }
        let qty = Qty::new(quantity);
        let limit_ticks = limit_price.map(|p| self.round_to_tick(p).as_i64());

        // Candidate levels in priority order, collected under a read lock
        // held only for the collection.
        let candidates: Vec<(i64, Arc<PriceLevel>)> = {
            let ladder = self.ladder(side.opposite()).read();
            let within = |ticks: i64| match (side, limit_ticks) {
                (_, None) => true,
                (Side::Buy, Some(limit)) => ticks <= limit,
                (Side::Sell, Some(limit)) => ticks >= limit,
            };
            match side {
                Side::Buy => ladder
                    .iter()
                    .take_while(|(ticks, _)| within(**ticks))
                    .map(|(ticks, level)| (*ticks, Arc::clone(level)))
                    .collect(),
                Side::Sell => ladder
                    .iter()
                    .rev()
                    .take_while(|(ticks, _)| within(**ticks))
                    .map(|(ticks, level)| (*ticks, Arc::clone(level)))
                    .collect(),
            }
        };

        let mut remaining = qty;
        let mut notional = 0.0;
        let mut touched_prices = Vec::new();
        let mut filled_ids = Vec::new();
        for (ticks, level) in candidates {
            if !remaining.is_positive() {
                break;
            }
            let level_match = level.match_incoming(side, remaining);
            if level_match.filled.is_positive() {
                remaining = remaining.saturating_sub(level_match.filled);
                notional += level_match.filled.as_f64() * Px::from_i64(ticks).as_f64();
                result.orders_matched += level_match.touched;
                result.matched_order_ids.extend(level_match.touched_ids);
                filled_ids.extend(level_match.filled_ids);
                touched_prices.push(ticks);
            }
        }

        let matched = qty.saturating_sub(remaining);
        result.matched_quantity = matched.as_f64();
        result.fully_filled = (quantity - result.matched_quantity).abs() < FILL_EPSILON;
        if matched.is_positive() {
            result.average_price = notional / result.matched_quantity;
            self.invalidate_cache();
            self.retire_filled(&filled_ids);
            self.prune_empty_levels(side.opposite(), &touched_prices);
            if self.config.enable_statistics {
                self.stats.total_matches.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .orders_matched
                    .fetch_add(filled_ids.len() as u64, Ordering::Relaxed);
                self.stats
                    .total_volume_matched
                    .fetch_add(result.matched_quantity);
                self.stats.total_value_matched.fetch_add(notional);
            }
        }
        result
    }

    /// Match an incoming limit order; any residual quantity is rested at the
    /// limit price under `id`
    ///
    /// # Errors
    /// Propagates `add_order` failures for the residual; the matched portion
    /// stands regardless.
    pub fn match_limit_order(
        &self,
        id: u64,
        side: Side,
        price: f64,
        quantity: f64,
    ) -> Result<MatchResult, BookError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(BookError::InvalidQuantity { quantity });
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(BookError::InvalidPrice { price });
        }
        let result = self.match_market_order(side, quantity, Some(price));
        let residual = quantity - result.matched_quantity;
        if residual > FILL_EPSILON {
            self.add_order(id, side, price, residual)?;
        }
        Ok(result)
    }

    /// Cancel a resting order. `false` when the id is unknown or the order
    /// already reached a terminal state.
    pub fn cancel_order(&self, id: u64) -> bool {
        let internal = self.resolve(id);
        let Some((side, price_ticks)) = self
            .lookup
            .read()
            .get(&internal)
            .map(|r| (r.side, r.price_ticks))
        else {
            return false;
        };
        let level = self.ladder(side).read().get(&price_ticks).map(Arc::clone);
        let cancelled = level
            .as_ref()
            .and_then(|level| level.cancel(internal))
            .is_some();

        // Either way the entry is dead: a successful cancel retires it, a
        // failed one means the order terminated earlier and the entry is
        // stale.
        self.lookup.write().remove(&internal);
        self.alias.write().remove(&id);
        if cancelled {
            self.invalidate_cache();
            self.prune_empty_levels(side, &[price_ticks]);
            if self.config.enable_statistics {
                self.stats.orders_cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }
        cancelled
    }

    /// Cancel-and-replace: the original id is retired and a fresh internal
    /// id keeps the caller id addressable
    ///
    /// # Errors
    /// [`BookError::UnknownOrder`] when nothing rests under `id`; validation
    /// errors from the replacement leg otherwise.
    pub fn modify_order(
        &self,
        id: u64,
        new_quantity: f64,
        new_price: Option<f64>,
    ) -> Result<(), BookError> {
        if !(new_quantity.is_finite() && new_quantity > 0.0) {
            return Err(BookError::InvalidQuantity {
                quantity: new_quantity,
            });
        }
        let internal = self.resolve(id);
        let Some((side, price_ticks)) = self
            .lookup
            .read()
            .get(&internal)
            .map(|r| (r.side, r.price_ticks))
        else {
            return Err(BookError::UnknownOrder { id });
        };
        let level = self.ladder(side).read().get(&price_ticks).map(Arc::clone);
        if level.as_ref().and_then(|level| level.cancel(internal)).is_none() {
            self.lookup.write().remove(&internal);
            self.alias.write().remove(&id);
            return Err(BookError::UnknownOrder { id });
        }
        self.lookup.write().remove(&internal);
        self.prune_empty_levels(side, &[price_ticks]);

        let price = new_price.unwrap_or_else(|| Px::from_i64(price_ticks).as_f64());
        let replacement = SYNTHETIC_ID | self.next_internal_id.fetch_add(1, Ordering::Relaxed);
        self.alias.write().insert(id, replacement);
        let px = self.round_to_tick(price);
        let priority = self.next_priority.fetch_add(1, Ordering::Relaxed);
        let order = Order::new(
            replacement,
            self.config.symbol,
            side,
            px,
            Qty::new(new_quantity),
            priority,
        );
        self.add_to_level(side, px, order)?;
        self.lookup.write().insert(
            replacement,
            OrderRef {
                side,
                price_ticks: px.as_i64(),
            },
        );
        self.invalidate_cache();
        Ok(())
    }

    /// Lifecycle state of a resting order, if it is still linked
    #[must_use]
    pub fn order_status(&self, id: u64) -> Option<OrderStatus> {
        let internal = self.resolve(id);
        let (side, price_ticks) = self
            .lookup
            .read()
            .get(&internal)
            .map(|r| (r.side, r.price_ticks))?;
        let level = self.ladder(side).read().get(&price_ticks).map(Arc::clone)?;
        level.find(internal).map(Order::status)
    }

    /// Unfilled quantity of a resting order
    #[must_use]
    pub fn order_remaining(&self, id: u64) -> Option<f64> {
        let internal = self.resolve(id);
        let (side, price_ticks) = self
            .lookup
            .read()
            .get(&internal)
            .map(|r| (r.side, r.price_ticks))?;
        let level = self.ladder(side).read().get(&price_ticks).map(Arc::clone)?;
        level.find(internal).map(|o| o.remaining().as_f64())
    }

    /// Best bid price, if any bids rest
    #[must_use]
    pub fn best_bid(&self) -> Option<f64> {
        self.refresh_cache();
        let ticks = self.cached_best_bid.load(Ordering::Acquire);
        (ticks > 0).then(|| Px::from_i64(ticks).as_f64())
    }

    /// Best ask price, if any asks rest
    #[must_use]
    pub fn best_ask(&self) -> Option<f64> {
        self.refresh_cache();
        let ticks = self.cached_best_ask.load(Ordering::Acquire);
        (ticks > 0).then(|| Px::from_i64(ticks).as_f64())
    }

    /// Mid price of a two-sided market
    #[must_use]
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Bid-ask spread of a two-sided market
    #[must_use]
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Market data snapshot with up to `depth_levels` aggregated levels per
    /// side
    #[must_use]
    pub fn snapshot(&self) -> MarketSnapshot {
        let depth = self.config.depth_levels;
        let collect = |ladder: &BTreeMap<i64, Arc<PriceLevel>>, descending: bool| {
            let mut levels = Vec::with_capacity(depth);
            let mut push = |level: &Arc<PriceLevel>, ticks: i64| {
                if !level.is_empty() && levels.len() < depth {
                    levels.push(SnapshotLevel {
                        price: Px::from_i64(ticks).as_f64(),
                        quantity: level.total_qty().as_f64(),
                        order_count: level.order_count(),
                    });
                }
            };
            if descending {
                for (ticks, level) in ladder.iter().rev() {
                    push(level, *ticks);
                }
            } else {
                for (ticks, level) in ladder.iter() {
                    push(level, *ticks);
                }
            }
            levels
        };

        let bid_levels = collect(&self.bids.read(), true);
        let ask_levels = collect(&self.asks.read(), false);
        MarketSnapshot {
            symbol: self.config.symbol,
            best_bid_price: bid_levels.first().map_or(0.0, |l| l.price),
            best_ask_price: ask_levels.first().map_or(0.0, |l| l.price),
            best_bid_quantity: bid_levels.first().map_or(0.0, |l| l.quantity),
            best_ask_quantity: ask_levels.first().map_or(0.0, |l| l.quantity),
            ts: Ts::now(),
            bid_levels,
            ask_levels,
        }
    }

    /// True when no live order rests on either side
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_orders() == 0
    }

    /// Count of live orders across both sides
    #[must_use]
    pub fn total_orders(&self) -> usize {
        let bids: usize = self.bids.read().values().map(|l| l.order_count()).sum();
        let asks: usize = self.asks.read().values().map(|l| l.order_count()).sum();
        bids + asks
    }

    /// Total live quantity on the bid side
    #[must_use]
    pub fn total_bid_quantity(&self) -> f64 {
        self.bids
            .read()
            .values()
            .map(|l| l.total_qty().as_f64())
            .sum()
    }

    /// Total live quantity on the ask side
    #[must_use]
    pub fn total_ask_quantity(&self) -> f64 {
        self.asks
            .read()
            .values()
            .map(|l| l.total_qty().as_f64())
            .sum()
    }

    /// Copy of the matching statistics
    #[must_use]
    pub fn stats(&self) -> BookStatsSnapshot {
        BookStatsSnapshot {
            orders_added: self.stats.orders_added.load(Ordering::Relaxed),
            orders_cancelled: self.stats.orders_cancelled.load(Ordering::Relaxed),
            orders_matched: self.stats.orders_matched.load(Ordering::Relaxed),
            total_matches: self.stats.total_matches.load(Ordering::Relaxed),
            total_volume_matched: self.stats.total_volume_matched.load(),
            total_value_matched: self.stats.total_value_matched.load(),
        }
    }

    fn invalidate_cache(&self) {
        self.cache_valid.store(false, Ordering::Release);
    }

    fn refresh_cache(&self) {
        if self.cache_valid.load(Ordering::Acquire) {
            return;
        }
        let best_bid = self
            .bids
            .read()
            .iter()
            .rev()
            .find(|(_, level)| !level.is_empty())
            .map_or(0, |(ticks, _)| *ticks);
        let best_ask = self
            .asks
            .read()
            .iter()
            .find(|(_, level)| !level.is_empty())
            .map_or(0, |(ticks, _)| *ticks);
        self.cached_best_bid.store(best_bid, Ordering::Release);
        self.cached_best_ask.store(best_ask, Ordering::Release);
        self.cache_valid.store(true, Ordering::Release);
    }

    fn retire_filled(&self, internal_ids: &[u64]) {
        if internal_ids.is_empty() {
            return;
        }
        let mut lookup = self.lookup.write();
        for id in internal_ids {
            lookup.remove(id);
        }
    }

    fn prune_empty_levels(&self, side: Side, prices: &[i64]) {
        if prices.is_empty() {
            return;
        }
        let mut ladder = self.ladder(side).write();
        for ticks in prices {
            if ladder.get(ticks).is_some_and(|level| level.is_empty()) {
                ladder.remove(ticks);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OrderBook {
        OrderBook::new(BookConfig {
            symbol: Symbol::new(1),
            tick_size: 0.01,
            depth_levels: 5,
            enable_statistics: true,
        })
    }

    #[test]
    fn test_invalid_orders_rejected() {
        let book = book();
        assert!(matches!(
            book.add_order(1, Side::Buy, 100.0, 0.0),
            Err(BookError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            book.add_order(1, Side::Buy, -5.0, 10.0),
            Err(BookError::InvalidPrice { .. })
        ));
        assert!(book.is_empty());
    }

    #[test]
    fn test_match_on_empty_book() {
        let book = book();
        let result = book.match_market_order(Side::Buy, 100.0, None);
        assert!((result.matched_quantity).abs() < f64::EPSILON);
        assert!(!result.fully_filled);
        assert_eq!(result.orders_matched, 0);
    }

    #[test]
    fn test_market_order_walks_levels_price_time() {
        let book = book();
        book.add_order(1, Side::Sell, 100.00, 30.0).expect("valid");
        book.add_order(2, Side::Sell, 100.01, 80.0).expect("valid");

        let result = book.match_market_order(Side::Buy, 100.0, None);
        assert!((result.matched_quantity - 100.0).abs() < 1e-9);
        let expected_vwap = (30.0 * 100.00 + 70.0 * 100.01) / 100.0;
        assert!((result.average_price - expected_vwap).abs() < 1e-9);
        assert_eq!(result.orders_matched, 2);
        assert!(result.fully_filled);

        // Order 1 is gone, order 2 has 10 left.
        assert_eq!(book.order_status(1), None);
        assert_eq!(book.order_status(2), Some(OrderStatus::Partial));
        let remaining = book.order_remaining(2).expect("order 2 rests");
        assert!((remaining - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_bound_stops_walk() {
        let book = book();
        book.add_order(1, Side::Sell, 100.00, 30.0).expect("valid");
        book.add_order(2, Side::Sell, 101.00, 30.0).expect("valid");

        let result = book.match_market_order(Side::Buy, 60.0, Some(100.50));
        assert!((result.matched_quantity - 30.0).abs() < 1e-9);
        assert!(!result.fully_filled);
        assert_eq!(book.order_status(2), Some(OrderStatus::Active));
    }

    #[test]
    fn test_limit_order_rests_residual() {
        let book = book();
        book.add_order(1, Side::Sell, 100.00, 30.0).expect("valid");

        let result = book
            .match_limit_order(42, Side::Buy, 100.00, 50.0)
            .expect("valid");
        assert!((result.matched_quantity - 30.0).abs() < 1e-9);
        assert!(!result.fully_filled);

        // Residual 20 rests as a bid at 100.00.
        assert!((book.total_bid_quantity() - 20.0).abs() < 1e-9);
        assert_eq!(book.order_status(42), Some(OrderStatus::Active));
        assert_eq!(book.best_bid(), Some(100.0));
    }

    #[test]
    fn test_cancel_restores_level_aggregate() {
        let book = book();
        book.add_order(1, Side::Buy, 99.0, 40.0).expect("valid");
        book.add_order(2, Side::Buy, 99.0, 25.0).expect("valid");
        let before = book.total_bid_quantity();

        assert!(book.cancel_order(2));
        assert!((book.total_bid_quantity() - (before - 25.0)).abs() < 1e-9);
        assert!(!book.cancel_order(2), "repeat cancel is a no-op");
        assert!(!book.cancel_order(999), "unknown id is a no-op");
    }

    #[test]
    fn test_cancelled_quantity_never_matches() {
        let book = book();
        book.add_order(1, Side::Sell, 100.0, 30.0).expect("valid");
        book.add_order(2, Side::Sell, 100.0, 30.0).expect("valid");
        assert!(book.cancel_order(1));

        let result = book.match_market_order(Side::Buy, 60.0, None);
        assert!((result.matched_quantity - 30.0).abs() < 1e-9);
        assert!(!result.matched_order_ids.contains(&1));
    }

    #[test]
    fn test_modify_retires_and_replaces() {
        let book = book();
        book.add_order(7, Side::Buy, 99.0, 40.0).expect("valid");
        book.modify_order(7, 15.0, Some(98.0)).expect("modifiable");

        assert_eq!(book.best_bid(), Some(98.0));
        assert!((book.total_bid_quantity() - 15.0).abs() < 1e-9);
        // Caller id still addresses the replacement.
        assert!(book.cancel_order(7));
        assert!(book.is_empty());
    }

    #[test]
    fn test_modify_unknown_order() {
        let book = book();
        assert!(matches!(
            book.modify_order(5, 10.0, None),
            Err(BookError::UnknownOrder { .. })
        ));
    }

    #[test]
    fn test_quotes_and_snapshot() {
        let book = book();
        book.add_order(1, Side::Buy, 99.50, 10.0).expect("valid");
        book.add_order(2, Side::Buy, 99.00, 20.0).expect("valid");
        book.add_order(3, Side::Sell, 100.50, 15.0).expect("valid");
        book.add_order(4, Side::Sell, 101.00, 25.0).expect("valid");

        assert_eq!(book.best_bid(), Some(99.50));
        assert_eq!(book.best_ask(), Some(100.50));
        assert!((book.mid_price().expect("two-sided") - 100.0).abs() < 1e-9);
        assert!((book.spread().expect("two-sided") - 1.0).abs() < 1e-9);

        let snap = book.snapshot();
        assert_eq!(snap.bid_levels.len(), 2);
        assert_eq!(snap.ask_levels.len(), 2);
        assert!((snap.bid_levels[0].price - 99.50).abs() < 1e-9);
        assert!((snap.ask_levels[0].price - 100.50).abs() < 1e-9);
        assert!((snap.mid_price() - 100.0).abs() < 1e-9);
        assert!(snap.spread_bps() > 0.0);
    }

    #[test]
    fn test_book_never_crosses() {
        let book = book();
        book.add_order(1, Side::Buy, 99.0, 10.0).expect("valid");
        book.add_order(2, Side::Sell, 101.0, 10.0).expect("valid");

        // A crossing limit buy consumes the ask instead of resting above it.
        let result = book
            .match_limit_order(3, Side::Buy, 102.0, 5.0)
            .expect("valid");
        assert!(result.fully_filled);
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            assert!(bid < ask, "book crossed: bid {bid} >= ask {ask}");
        }
    }

    #[test]
    fn test_tick_rounding() {
        let book = book();
        book.add_order(1, Side::Buy, 99.996, 10.0).expect("valid");
        assert_eq!(book.best_bid(), Some(100.0));
    }

    #[test]
    fn test_statistics_track_matching() {
        let book = book();
        book.add_order(1, Side::Sell, 100.0, 30.0).expect("valid");
        let _ = book.match_market_order(Side::Buy, 30.0, None);
        assert!(!book.cancel_order(1));

        let stats = book.stats();
        assert_eq!(stats.orders_added, 1);
        assert_eq!(stats.orders_matched, 1);
        assert_eq!(stats.total_matches, 1);
        assert!((stats.total_volume_matched - 30.0).abs() < 1e-9);
        assert!((stats.total_value_matched - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_matching_conserves_quantity() {
        use std::sync::Arc;
        use std::thread;

        let book = Arc::new(book());
        for id in 0..50u64 {
            #[allow(clippy::cast_precision_loss)]
            let price = 100.0 + (id % 3) as f64 * 0.01;
            book.add_order(id, Side::Sell, price, 10.0).expect("valid");
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let book = Arc::clone(&book);
            handles.push(thread::spawn(move || {
                let mut matched = 0.0;
                for _ in 0..25 {
                    matched += book.match_market_order(Side::Buy, 10.0, None).matched_quantity;
                }
                matched
            }));
        }
        let matched: f64 = handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .sum();

        // 4 threads x 25 x 10 = 1000 requested against 500 resting.
        assert!((matched - 500.0).abs() < 1e-9);
        assert!(book.is_empty());
        assert!((book.total_ask_quantity()).abs() < 1e-9);
    }
}
