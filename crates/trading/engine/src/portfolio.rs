//! Concurrent portfolio ledger
//!
//! Per-symbol positions with atomic PnL fields, portfolio aggregates kept as
//! lock-free doubles, an equity curve appended on every mark-to-market, and
//! a trade history appended on every fill. The position map takes a
//! reader-writer lock only for structural changes; individual positions
//! update through CAS.
//!
//! Aggregates are eventually consistent with positions: an observer can see
//! a position move before the matching aggregate delta lands. Readers that
//! need coherence take `snapshot_all` or call `recalculate`.

use bus::{FillEvent, MarketBarEvent};
use common::{AtomicF64, Clock, Symbol, Ts};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

use crate::config::PortfolioConfig;

/// Quantities within this tolerance of zero are flat
pub const FLAT_EPSILON: f64 = 1e-8;

/// Portfolio lookup failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortfolioError {
    /// No open position for the symbol
    #[error("no position for {0}")]
    UnknownPosition(Symbol),
}

/// One per-symbol position, all monetary fields atomic
#[derive(Debug)]
pub struct Position {
    symbol: Symbol,
    open_time: Ts,
    /// Signed: positive long, negative short, zero flat
    quantity: AtomicF64,
    entry_price: AtomicF64,
    mark_price: AtomicF64,
    unrealized_pnl: AtomicF64,
    realized_pnl: AtomicF64,
}

impl Position {
    fn new(symbol: Symbol, open_time: Ts) -> Self {
        Self {
            symbol,
            open_time,
            quantity: AtomicF64::new(0.0),
            entry_price: AtomicF64::new(0.0),
            mark_price: AtomicF64::new(0.0),
            unrealized_pnl: AtomicF64::new(0.0),
            realized_pnl: AtomicF64::new(0.0),
        }
    }

    /// Instrument
    #[must_use]
    pub const fn symbol(&self) -> Symbol {
        self.symbol
    }

    /// Signed open quantity
    #[must_use]
    pub fn quantity(&self) -> f64 {
        self.quantity.load()
    }

    /// Average entry price of the open quantity
    #[must_use]
    pub fn entry_price(&self) -> f64 {
        self.entry_price.load()
    }

    /// Most recent mark price
    #[must_use]
    pub fn mark_price(&self) -> f64 {
        self.mark_price.load()
    }

    /// Profit implied by the current mark on the open quantity
    #[must_use]
    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl.load()
    }

    /// Profit locked in by position-reducing fills
    #[must_use]
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl.load()
    }

    /// Realized plus unrealized
    #[must_use]
    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl() + self.unrealized_pnl()
    }

    /// Absolute market value at the current mark
    #[must_use]
    pub fn market_value(&self) -> f64 {
        (self.quantity() * self.mark_price()).abs()
    }

    /// True when long
    #[must_use]
    pub fn is_long(&self) -> bool {
        self.quantity() > FLAT_EPSILON
    }

    /// True when short
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity() < -FLAT_EPSILON
    }

    /// True when no quantity is open
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity().abs() < FLAT_EPSILON
    }

    /// Update the mark price and recompute unrealized PnL
    pub fn mark(&self, price: f64) {
        self.mark_price.store(price);
        let quantity = self.quantity();
        if quantity.abs() > FLAT_EPSILON {
            self.unrealized_pnl
                .store((price - self.entry_price()) * quantity);
        } else {
            self.unrealized_pnl.store(0.0);
        }
    }

    /// Apply a signed quantity delta at `trade_price`, returning the PnL
    /// realized on any closed portion
    ///
    /// Entry price is notional-weighted when adding in the same direction,
    /// unchanged when reducing, and resets to the trade price on a direction
    /// flip. The quantity update is a CAS; on contention the whole
    /// computation retries from a fresh read.
    pub fn adjust(&self, delta: f64, trade_price: f64) -> f64 {
        loop {
            let quantity = self.quantity.load();
            let entry = self.entry_price.load();
            let new_quantity = quantity + delta;

            let was_flat = quantity.abs() < FLAT_EPSILON;
            let reduces = !was_flat && quantity * delta < 0.0;
            let realized = if reduces {
                let closed = delta.abs().min(quantity.abs());
                (trade_price - entry) * closed * quantity.signum()
            } else {
                0.0
            };

            let now_flat = new_quantity.abs() < FLAT_EPSILON;
            let flips = !was_flat && !now_flat && new_quantity.signum() != quantity.signum();
            let new_entry = if was_flat || flips {
                trade_price
            } else if !reduces && new_quantity.abs() > quantity.abs() {
                (quantity * entry + delta * trade_price) / new_quantity
            } else {
                entry
            };

            let stored_quantity = if now_flat { 0.0 } else { new_quantity };
            if self
                .quantity
                .compare_exchange(quantity, stored_quantity)
                .is_err()
            {
                std::hint::spin_loop();
                continue;
            }

            self.entry_price.store(new_entry);
            if was_flat && !now_flat {
                // Opening trade doubles as the first mark.
                self.mark_price.store(trade_price);
            }
            if realized != 0.0 {
                self.realized_pnl.fetch_add(realized);
            }
            if now_flat {
                self.unrealized_pnl.store(0.0);
            } else {
                let mark = self.mark_price.load();
                self.unrealized_pnl
                    .store((mark - new_entry) * stored_quantity);
            }
            return realized;
        }
    }

    /// Eventually-consistent copy of all fields
    #[must_use]
    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: self.symbol,
            open_time: self.open_time,
            quantity: self.quantity(),
            entry_price: self.entry_price(),
            mark_price: self.mark_price(),
            unrealized_pnl: self.unrealized_pnl(),
            realized_pnl: self.realized_pnl(),
        }
    }
}

/// Plain copy of a position, safe to hand across threads
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSnapshot {
    /// Instrument
    pub symbol: Symbol,
    /// When the position was first opened
    pub open_time: Ts,
    /// Signed open quantity
    pub quantity: f64,
    /// Average entry price
    pub entry_price: f64,
    /// Latest mark price
    pub mark_price: f64,
    /// Unrealized PnL at the mark
    pub unrealized_pnl: f64,
    /// Cumulative realized PnL
    pub realized_pnl: f64,
}

#[derive(Debug)]
struct PortfolioAggregates {
    available_cash: AtomicF64,
    total_market_value: AtomicF64,
    total_unrealized_pnl: AtomicF64,
    total_realized_pnl: AtomicF64,
    total_positions: AtomicUsize,
    long_positions: AtomicUsize,
    short_positions: AtomicUsize,
}

/// One-call consistent copy of the portfolio aggregates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortfolioStatsSnapshot {
    /// Cash available
    pub available_cash: f64,
    /// Sum of absolute position market values
    pub total_market_value: f64,
    /// Cash plus market value
    pub total_equity: f64,
    /// Aggregate unrealized PnL
    pub total_unrealized_pnl: f64,
    /// Aggregate realized PnL
    pub total_realized_pnl: f64,
    /// Realized plus unrealized
    pub total_pnl: f64,
    /// Open positions
    pub total_positions: usize,
    /// Open long positions
    pub long_positions: usize,
    /// Open short positions
    pub short_positions: usize,
}

/// Portfolio ledger: positions, cash, equity and trade history
pub struct Portfolio {
    initial_capital: f64,
    clock: Clock,
    positions: RwLock<FxHashMap<Symbol, Arc<Position>>>,
    aggregates: PortfolioAggregates,
    cached_equity: AtomicF64,
    equity_cache_valid: AtomicBool,
    equity_curve: RwLock<Vec<f64>>,
    trade_history: RwLock<Vec<FillEvent>>,
}

impl Portfolio {
    /// Seed a portfolio with the configured starting capital
    #[must_use]
    pub fn new(config: PortfolioConfig, clock: Clock) -> Self {
        let config = config.validated();
        Self {
            initial_capital: config.initial_capital,
            clock,
            positions: RwLock::new(FxHashMap::default()),
            aggregates: PortfolioAggregates {
                available_cash: AtomicF64::new(config.initial_capital),
                total_market_value: AtomicF64::new(0.0),
                total_unrealized_pnl: AtomicF64::new(0.0),
                total_realized_pnl: AtomicF64::new(0.0),
                total_positions: AtomicUsize::new(0),
                long_positions: AtomicUsize::new(0),
                short_positions: AtomicUsize::new(0),
            },
            cached_equity: AtomicF64::new(config.initial_capital),
            equity_cache_valid: AtomicBool::new(true),
            equity_curve: RwLock::new(vec![config.initial_capital]),
            trade_history: RwLock::new(Vec::new()),
        }
    }

    /// Starting capital
    #[must_use]
    pub const fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Mark any open position for `bar.symbol` to the close and append an
    /// equity snapshot
    pub fn on_bar(&self, bar: &MarketBarEvent) {
        let position = self.positions.read().get(&bar.symbol).map(Arc::clone);
        let Some(position) = position else {
            return;
        };

        let old_market_value = position.market_value();
        let old_unrealized = position.unrealized_pnl();
        position.mark(bar.close);
        let market_value_delta = position.market_value() - old_market_value;
        let unrealized_delta = position.unrealized_pnl() - old_unrealized;

        if market_value_delta.abs() > FLAT_EPSILON {
            self.aggregates
                .total_market_value
                .fetch_add(market_value_delta);
            self.invalidate_equity();
        }
        if unrealized_delta.abs() > FLAT_EPSILON {
            self.aggregates
                .total_unrealized_pnl
                .fetch_add(unrealized_delta);
        }

        let equity = self.total_equity();
        self.equity_curve.write().push(equity);
    }

    /// Fold a fill into cash, trade history and the position for its symbol
    pub fn apply_fill(&self, fill: &FillEvent) {
        self.trade_history.write().push(*fill);

        // Buys consume cash, sells release it; commission always costs.
        let cash_delta = -fill.side.sign() * fill.quantity * fill.price - fill.commission;
        self.aggregates.available_cash.fetch_add(cash_delta);
        self.invalidate_equity();

        let delta = fill.side.sign() * fill.quantity;
        let (position, existed) = self.get_or_create(fill.symbol);
        let was_long = position.is_long();
        let was_short = position.is_short();
        let old_market_value = position.market_value();
        let old_unrealized = position.unrealized_pnl();

        let realized = position.adjust(delta, fill.price);

        if realized.abs() > FLAT_EPSILON {
            self.aggregates.total_realized_pnl.fetch_add(realized);
        }
        let market_value_delta = position.market_value() - old_market_value;
        if market_value_delta.abs() > FLAT_EPSILON {
            self.aggregates
                .total_market_value
                .fetch_add(market_value_delta);
        }
        let unrealized_delta = position.unrealized_pnl() - old_unrealized;
        if unrealized_delta.abs() > FLAT_EPSILON {
            self.aggregates
                .total_unrealized_pnl
                .fetch_add(unrealized_delta);
        }

        let is_long = position.is_long();
        let is_short = position.is_short();
        let is_flat = position.is_flat();
        let was_open = existed && (was_long || was_short);

        if !was_open && !is_flat {
            self.aggregates.total_positions.fetch_add(1, Ordering::AcqRel);
            if is_long {
                self.aggregates.long_positions.fetch_add(1, Ordering::AcqRel);
            } else {
                self.aggregates.short_positions.fetch_add(1, Ordering::AcqRel);
            }
        } else if was_open && is_flat {
            self.aggregates.total_positions.fetch_sub(1, Ordering::AcqRel);
            if was_long {
                self.aggregates.long_positions.fetch_sub(1, Ordering::AcqRel);
            } else {
                self.aggregates.short_positions.fetch_sub(1, Ordering::AcqRel);
            }
            self.remove_flat(fill.symbol);
        } else if was_open {
            if was_long && is_short {
                self.aggregates.long_positions.fetch_sub(1, Ordering::AcqRel);
                self.aggregates.short_positions.fetch_add(1, Ordering::AcqRel);
            } else if was_short && is_long {
                self.aggregates.short_positions.fetch_sub(1, Ordering::AcqRel);
                self.aggregates.long_positions.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.invalidate_equity();
    }

    /// Consistent copy of the position for `symbol`
    ///
    /// # Errors
    /// [`PortfolioError::UnknownPosition`] when no position is open.
    pub fn snapshot(&self, symbol: Symbol) -> Result<PositionSnapshot, PortfolioError> {
        self.positions
            .read()
            .get(&symbol)
            .map(|p| p.snapshot())
            .ok_or(PortfolioError::UnknownPosition(symbol))
    }

    /// Snapshots of every open position
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<PositionSnapshot> {
        self.positions
            .read()
            .values()
            .map(|p| p.snapshot())
            .collect()
    }

    /// True when a non-flat position exists for `symbol`
    #[must_use]
    pub fn has_position(&self, symbol: Symbol) -> bool {
        self.positions
            .read()
            .get(&symbol)
            .is_some_and(|p| !p.is_flat())
    }

    /// Cash available
    #[must_use]
    pub fn available_cash(&self) -> f64 {
        self.aggregates.available_cash.load()
    }

    /// Sum of absolute market values over open positions
    #[must_use]
    pub fn total_market_value(&self) -> f64 {
        self.aggregates.total_market_value.load()
    }

    /// Aggregate unrealized PnL
    #[must_use]
    pub fn total_unrealized_pnl(&self) -> f64 {
        self.aggregates.total_unrealized_pnl.load()
    }

    /// Aggregate realized PnL
    #[must_use]
    pub fn total_realized_pnl(&self) -> f64 {
        self.aggregates.total_realized_pnl.load()
    }

    /// Realized plus unrealized
    #[must_use]
    pub fn total_pnl(&self) -> f64 {
        self.total_realized_pnl() + self.total_unrealized_pnl()
    }

    /// Cash plus market value, served from a cache validated on demand
    #[must_use]
    pub fn total_equity(&self) -> f64 {
        if self.equity_cache_valid.load(Ordering::Acquire) {
            return self.cached_equity.load();
        }
        let equity = self.available_cash() + self.total_market_value();
        self.cached_equity.store(equity);
        self.equity_cache_valid.store(true, Ordering::Release);
        equity
    }

    /// Open position count
    #[must_use]
    pub fn position_count(&self) -> usize {
        self.aggregates.total_positions.load(Ordering::Acquire)
    }

    /// Open long position count
    #[must_use]
    pub fn long_position_count(&self) -> usize {
        self.aggregates.long_positions.load(Ordering::Acquire)
    }

    /// Open short position count
    #[must_use]
    pub fn short_position_count(&self) -> usize {
        self.aggregates.short_positions.load(Ordering::Acquire)
    }

    /// One-call copy of all aggregates
    #[must_use]
    pub fn stats(&self) -> PortfolioStatsSnapshot {
        let realized = self.total_realized_pnl();
        let unrealized = self.total_unrealized_pnl();
        PortfolioStatsSnapshot {
            available_cash: self.available_cash(),
            total_market_value: self.total_market_value(),
            total_equity: self.total_equity(),
            total_unrealized_pnl: unrealized,
            total_realized_pnl: realized,
            total_pnl: realized + unrealized,
            total_positions: self.position_count(),
            long_positions: self.long_position_count(),
            short_positions: self.short_position_count(),
        }
    }

    /// Equity snapshots, one per marked bar, starting at the initial capital
    #[must_use]
    pub fn equity_curve(&self) -> Vec<f64> {
        self.equity_curve.read().clone()
    }

    /// Every fill applied, in arrival order
    #[must_use]
    pub fn trade_history(&self) -> Vec<FillEvent> {
        self.trade_history.read().clone()
    }

    /// Rebuild every aggregate from the positions, the convergence anchor
    /// for eventually-consistent readers
    pub fn recalculate(&self) {
        let positions = self.positions.read();
        let mut market_value = 0.0;
        let mut unrealized = 0.0;
        let mut total = 0usize;
        let mut long = 0usize;
        let mut short = 0usize;
        for position in positions.values() {
            if position.is_flat() {
                continue;
            }
            market_value += position.market_value();
            unrealized += position.unrealized_pnl();
            total += 1;
            if position.is_long() {
                long += 1;
            } else {
                short += 1;
            }
        }
        drop(positions);

        self.aggregates.total_market_value.store(market_value);
        self.aggregates.total_unrealized_pnl.store(unrealized);
        self.aggregates.total_positions.store(total, Ordering::Release);
        self.aggregates.long_positions.store(long, Ordering::Release);
        self.aggregates.short_positions.store(short, Ordering::Release);
        let equity = self.available_cash() + market_value;
        self.cached_equity.store(equity);
        self.equity_cache_valid.store(true, Ordering::Release);
    }

    fn invalidate_equity(&self) {
        self.equity_cache_valid.store(false, Ordering::Release);
    }

    fn get_or_create(&self, symbol: Symbol) -> (Arc<Position>, bool) {
        if let Some(position) = self.positions.read().get(&symbol) {
            return (Arc::clone(position), true);
        }
        let mut positions = self.positions.write();
        // Double-check after taking the writer lock.
        if let Some(position) = positions.get(&symbol) {
            return (Arc::clone(position), true);
        }
        let position = Arc::new(Position::new(symbol, self.clock.now()));
        positions.insert(symbol, Arc::clone(&position));
        (position, false)
    }

    fn remove_flat(&self, symbol: Symbol) {
        let mut positions = self.positions.write();
        if positions.get(&symbol).is_some_and(|p| p.is_flat()) {
            positions.remove(&symbol);
        }
    }
}
