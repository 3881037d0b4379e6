//! Execution layer: signals in, fills out
//!
//! Two modes. Simple-slippage derives the execution price from the reference
//! price, slippage factor and quoted spread, optionally shaving quantity for
//! partial fills. Order-book mode lazily builds one book per symbol, seeds
//! market-maker liquidity on market data updates when enabled, and executes
//! signals as immediate market orders with price-time priority; a signal
//! that matches nothing produces no fill.
//!
//! Randomness comes from one seeded generator so single-producer replays
//! reproduce bit-for-bit.

use bus::{FillEvent, SignalEvent, SignalKind};
use common::{AtomicF64, Clock, Side, Symbol};
use lob::{BookConfig, MarketSnapshot, OrderBook};
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::ExecutionConfig;

/// EMA smoothing factor for latency averages
const LATENCY_EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Default)]
struct ExecutionStats {
    total_executions: AtomicU64,
    partial_fills: AtomicU64,
    full_fills: AtomicU64,
    total_volume: AtomicF64,
    total_value: AtomicF64,
    total_commission: AtomicF64,
    avg_execution_latency_ns: AtomicF64,
    max_execution_latency_ns: AtomicF64,
    book_operations: AtomicU64,
    maker_quotes_added: AtomicU64,
    maker_fills: AtomicU64,
}

/// Point-in-time copy of the execution statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionStatsSnapshot {
    /// Signals that produced a fill
    pub total_executions: u64,
    /// Fills for less than the requested quantity
    pub partial_fills: u64,
    /// Fills for the full requested quantity
    pub full_fills: u64,
    /// Total quantity executed
    pub total_volume: f64,
    /// Total notional executed
    pub total_value: f64,
    /// Total commission charged
    pub total_commission: f64,
    /// EMA of per-execution latency, nanoseconds
    pub avg_execution_latency_ns: f64,
    /// Worst per-execution latency, nanoseconds
    pub max_execution_latency_ns: f64,
    /// Order book operations performed
    pub book_operations: u64,
    /// Market maker quotes accepted into books
    pub maker_quotes_added: u64,
    /// Executions filled against market maker liquidity
    pub maker_fills: u64,
}

#[derive(Debug, Default)]
struct MarketMakerState {
    next_order_id: u64,
    quoted_once: bool,
}

/// Converts strategy signals into simulated fills
pub struct ExecutionSimulator {
    config: ExecutionConfig,
    clock: Clock,
    books: RwLock<FxHashMap<Symbol, Arc<OrderBook>>>,
    makers: Mutex<FxHashMap<Symbol, MarketMakerState>>,
    rng: Mutex<SmallRng>,
    stats: ExecutionStats,
}

impl ExecutionSimulator {
    /// Build a simulator from a validated configuration
    #[must_use]
    pub fn new(config: ExecutionConfig, clock: Clock) -> Self {
        let config = config.validated();
        if config.use_order_book {
            tracing::info!(
                tick_size = config.tick_size,
                market_making = config.enable_market_making,
                latency_simulation = config.simulate_latency,
                "execution: order book simulation enabled"
            );
        } else {
            tracing::info!("execution: simple slippage execution enabled");
        }
        Self {
            config,
            clock,
            books: RwLock::new(FxHashMap::default()),
            makers: Mutex::new(FxHashMap::default()),
            rng: Mutex::new(SmallRng::seed_from_u64(config.seed)),
            stats: ExecutionStats::default(),
        }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute a signal against the reference market price
    ///
    /// `None` for hold/exit signals, non-positive inputs, or an order-book
    /// match that found no liquidity.
    #[must_use]
    pub fn execute(&self, signal: &SignalEvent, reference_price: f64) -> Option<FillEvent> {
        let side = match signal.kind {
            SignalKind::Buy => Side::Buy,
            SignalKind::Sell => Side::Sell,
            // EXIT is resolved into a directional signal by the dispatcher;
            // HOLD never trades.
            SignalKind::Hold | SignalKind::Exit => return None,
        };
        if !(reference_price.is_finite() && reference_price > 0.0) {
            return None;
        }
        if !(signal.quantity.is_finite() && signal.quantity > 0.0) {
            return None;
        }

        let start = self.clock.mono_ns();
        let fill = if self.config.use_order_book {
            self.execute_against_book(signal.symbol, side, signal.quantity)
        } else {
            Some(self.execute_simple(signal.symbol, side, signal.quantity, reference_price))
        };

        if let Some(fill) = fill {
            if self.config.simulate_latency {
                self.sleep_execution_latency();
            }
            let elapsed = self.clock.mono_ns() - start;
            self.record_execution(&fill, signal.quantity, elapsed);
            Some(fill)
        } else {
            None
        }
    }

    fn execute_simple(
        &self,
        symbol: Symbol,
        side: Side,
        quantity: f64,
        reference_price: f64,
    ) -> FillEvent {
        let direction = side.sign();
        let slippage = reference_price * self.config.slippage_factor * direction;
        let half_spread =
            reference_price * (self.config.bid_ask_spread_bps / 10_000.0) / 2.0 * direction;
        let price = reference_price + slippage + half_spread;

        let mut executed = quantity;
        if self.config.simulate_partial_fills {
            let mut rng = self.rng.lock();
            if rng.gen::<f64>() < self.config.partial_fill_probability {
                let ratio = self.config.min_fill_ratio
                    + (1.0 - self.config.min_fill_ratio) * rng.gen::<f64>();
                executed = quantity * ratio;
            }
        }

        FillEvent {
            symbol,
            quantity: executed,
            price,
            commission: self.commission(executed, price),
            side,
            ..FillEvent::default()
        }
    }

    fn execute_against_book(&self, symbol: Symbol, side: Side, quantity: f64) -> Option<FillEvent> {
        let book = self.book_for(symbol);
        let result = book.match_market_order(side, quantity, None);
        self.stats.book_operations.fetch_add(1, Ordering::Relaxed);
        if result.matched_quantity <= 0.0 {
            return None;
        }
        if self.config.enable_market_making {
            self.stats.maker_fills.fetch_add(1, Ordering::Relaxed);
        }
        Some(FillEvent {
            symbol,
            quantity: result.matched_quantity,
            price: result.average_price,
            commission: self.commission(result.matched_quantity, result.average_price),
            side,
            ..FillEvent::default()
        })
    }

    /// Feed a market data update into the order-book mode: refresh market
    /// maker quotes (probabilistically) around the new price
    pub fn update_market_data(&self, symbol: Symbol, price: f64) {
        if !self.config.use_order_book || !(price.is_finite() && price > 0.0) {
            return;
        }
        if self.config.enable_market_making {
            self.seed_maker_liquidity(symbol, price);
        }
    }

    fn seed_maker_liquidity(&self, symbol: Symbol, price: f64) {
        let book = self.book_for(symbol);
        let mut makers = self.makers.lock();
        let state = makers.entry(symbol).or_default();

        let refresh = if state.quoted_once {
            self.rng.lock().gen::<f64>() < self.config.market_maker_refresh_rate
        } else {
            true
        };
        if !refresh {
            return;
        }

        let tick = self.config.tick_size;
        let half_spread = price * (self.config.market_maker_spread_bps / 10_000.0) / 2.0;
        let bid = ((price - half_spread) / tick).floor() * tick;
        let ask = ((price + half_spread) / tick).ceil() * tick;

        for i in 0..self.config.market_maker_order_count {
            #[allow(clippy::cast_precision_loss)]
            let offset = i as f64 * tick;

            state.next_order_id += 1;
            if book
                .add_order(
                    state.next_order_id,
                    Side::Buy,
                    bid - offset,
                    self.config.market_maker_size,
                )
                .is_ok()
            {
                self.stats.maker_quotes_added.fetch_add(1, Ordering::Relaxed);
            }

            state.next_order_id += 1;
            if book
                .add_order(
                    state.next_order_id,
                    Side::Sell,
                    ask + offset,
                    self.config.market_maker_size,
                )
                .is_ok()
            {
                self.stats.maker_quotes_added.fetch_add(1, Ordering::Relaxed);
            }
        }
        state.quoted_once = true;
    }

    /// Market data snapshot for `symbol`; empty outside order-book mode
    #[must_use]
    pub fn market_data(&self, symbol: Symbol) -> MarketSnapshot {
        if !self.config.use_order_book {
            return MarketSnapshot {
                symbol,
                ..MarketSnapshot::default()
            };
        }
        match self.books.read().get(&symbol) {
            Some(book) => book.snapshot(),
            None => MarketSnapshot {
                symbol,
                ..MarketSnapshot::default()
            },
        }
    }

    /// The lazily created book for `symbol`, if any exists yet
    #[must_use]
    pub fn book(&self, symbol: Symbol) -> Option<Arc<OrderBook>> {
        self.books.read().get(&symbol).map(Arc::clone)
    }

    /// Copy of the execution statistics
    #[must_use]
    pub fn stats(&self) -> ExecutionStatsSnapshot {
        ExecutionStatsSnapshot {
            total_executions: self.stats.total_executions.load(Ordering::Relaxed),
            partial_fills: self.stats.partial_fills.load(Ordering::Relaxed),
            full_fills: self.stats.full_fills.load(Ordering::Relaxed),
            total_volume: self.stats.total_volume.load(),
            total_value: self.stats.total_value.load(),
            total_commission: self.stats.total_commission.load(),
            avg_execution_latency_ns: self.stats.avg_execution_latency_ns.load(),
            max_execution_latency_ns: self.stats.max_execution_latency_ns.load(),
            book_operations: self.stats.book_operations.load(Ordering::Relaxed),
            maker_quotes_added: self.stats.maker_quotes_added.load(Ordering::Relaxed),
            maker_fills: self.stats.maker_fills.load(Ordering::Relaxed),
        }
    }

    fn book_for(&self, symbol: Symbol) -> Arc<OrderBook> {
        if let Some(book) = self.books.read().get(&symbol) {
            return Arc::clone(book);
        }
        let mut books = self.books.write();
        Arc::clone(books.entry(symbol).or_insert_with(|| {
            Arc::new(OrderBook::new(BookConfig {
                symbol,
                tick_size: self.config.tick_size,
                depth_levels: self.config.depth_levels,
                enable_statistics: self.config.enable_book_statistics,
            }))
        }))
    }

    fn commission(&self, quantity: f64, price: f64) -> f64 {
        quantity * self.config.commission_per_share
            + quantity * price * self.config.commission_percentage / 100.0
    }

    fn sleep_execution_latency(&self) {
        let min = self.config.min_execution_latency_us;
        let max = self.config.max_execution_latency_us;
        let micros = if max > min {
            self.rng.lock().gen_range(min..=max)
        } else {
            min
        };
        std::thread::sleep(Duration::from_micros(micros));
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_execution(&self, fill: &FillEvent, requested: f64, elapsed_ns: u64) {
        self.stats.total_executions.fetch_add(1, Ordering::Relaxed);
        self.stats.total_volume.fetch_add(fill.quantity);
        self.stats.total_value.fetch_add(fill.quantity * fill.price);
        self.stats.total_commission.fetch_add(fill.commission);
        if requested - fill.quantity > 1e-8 {
            self.stats.partial_fills.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.full_fills.fetch_add(1, Ordering::Relaxed);
        }

        let elapsed = elapsed_ns as f64;
        self.stats.max_execution_latency_ns.fetch_max(elapsed);
        let current = self.stats.avg_execution_latency_ns.load();
        let next = if current == 0.0 {
            elapsed
        } else {
            LATENCY_EMA_ALPHA * elapsed + (1.0 - LATENCY_EMA_ALPHA) * current
        };
        self.stats.avg_execution_latency_ns.store(next);
    }
}
