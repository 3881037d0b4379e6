//! Engine configuration
//!
//! Invalid values never abort construction: each section normalizes to a
//! documented default and logs the substitution, so a run always starts with
//! a coherent configuration.

use bus::BusConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatch loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Events pulled per batch before yielding
    pub max_events_per_batch: usize,
    /// Batch time slice in microseconds
    pub max_batch_duration_us: u64,
    /// Record per-event processing latency
    pub enable_latency_monitoring: bool,
    /// Per-event duration above this emits a warning, in microseconds
    pub latency_spike_threshold_us: u64,
    /// Bounded sample reservoir for percentile estimation
    pub latency_sample_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_events_per_batch: 1000,
            max_batch_duration_us: 1000,
            enable_latency_monitoring: false,
            latency_spike_threshold_us: 100,
            latency_sample_capacity: 10_000,
        }
    }
}

impl DispatchConfig {
    /// Normalize invalid fields, logging substitutions
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.max_events_per_batch == 0 {
            tracing::warn!("max_events_per_batch must be >= 1, using 1000");
            self.max_events_per_batch = 1000;
        }
        if self.max_batch_duration_us == 0 {
            tracing::warn!("max_batch_duration must be >= 1us, using 1000us");
            self.max_batch_duration_us = 1000;
        }
        if self.latency_sample_capacity == 0 {
            self.latency_sample_capacity = 10_000;
        }
        self
    }

    /// Batch time slice as a duration
    #[must_use]
    pub const fn max_batch_duration(&self) -> Duration {
        Duration::from_micros(self.max_batch_duration_us)
    }

    /// Spike threshold in nanoseconds
    #[must_use]
    pub const fn latency_spike_threshold_ns(&self) -> u64 {
        self.latency_spike_threshold_us * 1_000
    }
}

/// Execution simulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Fixed commission per share
    pub commission_per_share: f64,
    /// Commission as a percentage of notional
    pub commission_percentage: f64,
    /// Quoted spread applied around the reference price, in basis points
    pub bid_ask_spread_bps: f64,
    /// Proportional slippage applied in the direction of the trade
    pub slippage_factor: f64,
    /// Match against a per-symbol order book instead of simple slippage
    pub use_order_book: bool,
    /// Book tick size
    pub tick_size: f64,
    /// Book market-data depth
    pub depth_levels: usize,
    /// Collect per-book matching statistics
    pub enable_book_statistics: bool,
    /// Seed synthetic market-maker liquidity on market data updates
    pub enable_market_making: bool,
    /// Market maker quote spread, in basis points
    pub market_maker_spread_bps: f64,
    /// Quotes per side per refresh
    pub market_maker_order_count: usize,
    /// Size of each market maker order
    pub market_maker_size: f64,
    /// Probability of refreshing quotes on each update, in [0, 1]
    pub market_maker_refresh_rate: f64,
    /// Sleep for a sampled latency before returning fills
    pub simulate_latency: bool,
    /// Minimum simulated execution latency, microseconds
    pub min_execution_latency_us: u64,
    /// Maximum simulated execution latency, microseconds
    pub max_execution_latency_us: u64,
    /// Randomly fill only part of the requested quantity
    pub simulate_partial_fills: bool,
    /// Probability of a partial fill, in [0, 1]
    pub partial_fill_probability: f64,
    /// Lower bound of the partial fill ratio, in (0, 1]
    pub min_fill_ratio: f64,
    /// RNG seed; fixed so single-producer replays reproduce
    pub seed: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            commission_per_share: 0.005,
            commission_percentage: 0.0,
            bid_ask_spread_bps: 10.0,
            slippage_factor: 0.0005,
            use_order_book: false,
            tick_size: 0.01,
            depth_levels: 5,
            enable_book_statistics: false,
            enable_market_making: false,
            market_maker_spread_bps: 20.0,
            market_maker_order_count: 3,
            market_maker_size: 500.0,
            market_maker_refresh_rate: 0.3,
            simulate_latency: false,
            min_execution_latency_us: 10,
            max_execution_latency_us: 100,
            simulate_partial_fills: false,
            partial_fill_probability: 0.1,
            min_fill_ratio: 0.5,
            seed: 42,
        }
    }
}

impl ExecutionConfig {
    /// Normalize invalid fields, logging substitutions
    #[must_use]
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.commission_per_share < 0.0 {
            tracing::warn!("negative per-share commission, using default");
            self.commission_per_share = defaults.commission_per_share;
        }
        if self.commission_percentage < 0.0 {
            tracing::warn!("negative percentage commission, using default");
            self.commission_percentage = defaults.commission_percentage;
        }
        if self.bid_ask_spread_bps < 0.0 {
            self.bid_ask_spread_bps = defaults.bid_ask_spread_bps;
        }
        if self.slippage_factor < 0.0 {
            self.slippage_factor = defaults.slippage_factor;
        }
        if !(self.tick_size.is_finite() && self.tick_size > 0.0) {
            tracing::warn!(tick_size = self.tick_size, "invalid tick size, using 0.01");
            self.tick_size = 0.01;
        }
        if self.depth_levels == 0 {
            self.depth_levels = defaults.depth_levels;
        }
        self.market_maker_refresh_rate = self.market_maker_refresh_rate.clamp(0.0, 1.0);
        self.partial_fill_probability = self.partial_fill_probability.clamp(0.0, 1.0);
        if !(self.min_fill_ratio > 0.0 && self.min_fill_ratio <= 1.0) {
            tracing::warn!(
                min_fill_ratio = self.min_fill_ratio,
                "fill ratio outside (0, 1], using default"
            );
            self.min_fill_ratio = defaults.min_fill_ratio;
        }
        if self.max_execution_latency_us < self.min_execution_latency_us {
            std::mem::swap(
                &mut self.max_execution_latency_us,
                &mut self.min_execution_latency_us,
            );
        }
        self
    }
}

/// Portfolio seeding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Starting cash
    pub initial_capital: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
        }
    }
}

impl PortfolioConfig {
    /// Normalize invalid fields, logging substitutions
    #[must_use]
    pub fn validated(mut self) -> Self {
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            tracing::warn!(
                initial_capital = self.initial_capital,
                "invalid initial capital, using 100000"
            );
            self.initial_capital = 100_000.0;
        }
        self
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Event bus and pool sizing
    pub bus: BusConfig,
    /// Dispatch loop tuning
    pub dispatch: DispatchConfig,
    /// Execution simulation
    pub execution: ExecutionConfig,
    /// Portfolio seeding
    pub portfolio: PortfolioConfig,
}

impl EngineConfig {
    /// Normalize every section
    #[must_use]
    pub fn validated(self) -> Self {
        Self {
            bus: self.bus.validated(),
            dispatch: self.dispatch.validated(),
            execution: self.execution.validated(),
            portfolio: self.portfolio.validated(),
        }
    }
}
