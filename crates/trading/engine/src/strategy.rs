//! Strategy capability and the reference SMA crossover implementation
//!
//! Strategies are stateful bar consumers that may emit signals. They must be
//! clonable (the optimizer re-runs parameter variations on fresh copies) and
//! accept a numeric parameter map. Emission returns the signal by value; the
//! dispatcher owns pooling and re-enqueueing, so strategies never see event
//! handles.

use bus::{MarketBarEvent, SignalEvent, SignalKind};
use common::Symbol;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Stateful bar-driven trading strategy
pub trait Strategy: Send {
    /// Human-readable strategy name
    fn name(&self) -> &str;

    /// Fold one market bar into the strategy state; must not block
    fn on_bar(&mut self, bar: &MarketBarEvent);

    /// Emit a signal implied by the current state, if any
    fn maybe_emit(&mut self) -> Option<SignalEvent>;

    /// Fresh owned copy for optimizer re-use
    fn clone_box(&self) -> Box<dyn Strategy>;

    /// Set a numeric parameter by name
    fn set_parameter(&mut self, key: &str, value: f64);

    /// Read a numeric parameter by name
    fn get_parameter(&self, key: &str) -> Option<f64>;
}

impl Clone for Box<dyn Strategy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Rolling-window simple moving average with O(1) updates
#[derive(Debug, Clone)]
struct IncrementalSma {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl IncrementalSma {
    fn new(window: usize) -> Self {
        Self {
            window,
            values: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    fn update(&mut self, value: f64) {
        self.values.push_back(value);
        self.sum += value;
        if self.values.len() > self.window {
            if let Some(evicted) = self.values.pop_front() {
                self.sum -= evicted;
            }
        }
    }

    /// The average once the window is full
    #[allow(clippy::cast_precision_loss)]
    fn value(&self) -> Option<f64> {
        (self.values.len() == self.window).then(|| self.sum / self.window as f64)
    }

    fn reset(&mut self, window: usize) {
        self.window = window;
        self.values.clear();
        self.sum = 0.0;
    }
}

/// Reference strategy: golden-cross of two moving averages
///
/// Emits BUY when the short average crosses above the long, SELL when it
/// crosses below, with signal-state de-duplication so a sustained trend
/// yields exactly one signal.
pub struct SmaCrossoverStrategy {
    name: String,
    short: IncrementalSma,
    long: IncrementalSma,
    last_signal: SignalKind,
    symbol: Option<Symbol>,
    order_quantity: f64,
    parameters: FxHashMap<String, f64>,
}

impl SmaCrossoverStrategy {
    /// Default window for the short average
    pub const DEFAULT_SHORT_WINDOW: usize = 10;
    /// Default window for the long average
    pub const DEFAULT_LONG_WINDOW: usize = 30;

    /// Create a crossover strategy; windows must satisfy
    /// `0 < short < long`, anything else falls back to the defaults
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(short_window: usize, long_window: usize) -> Self {
        let (short_window, long_window) = if short_window == 0 || long_window <= short_window {
            tracing::warn!(
                short_window,
                long_window,
                "invalid SMA windows, using defaults"
            );
            (Self::DEFAULT_SHORT_WINDOW, Self::DEFAULT_LONG_WINDOW)
        } else {
            (short_window, long_window)
        };
        let mut parameters = FxHashMap::default();
        parameters.insert("short_window".to_string(), short_window as f64);
        parameters.insert("long_window".to_string(), long_window as f64);
        parameters.insert("order_quantity".to_string(), 100.0);
        Self {
            name: "SmaCrossover".to_string(),
            short: IncrementalSma::new(short_window),
            long: IncrementalSma::new(long_window),
            last_signal: SignalKind::Hold,
            symbol: None,
            order_quantity: 100.0,
            parameters,
        }
    }
}

impl Strategy for SmaCrossoverStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_bar(&mut self, bar: &MarketBarEvent) {
        if self.symbol.is_none() {
            self.symbol = Some(bar.symbol);
        }
        self.short.update(bar.close);
        self.long.update(bar.close);
    }

    fn maybe_emit(&mut self) -> Option<SignalEvent> {
        let symbol = self.symbol?;
        let short = self.short.value()?;
        let long = self.long.value()?;

        let kind = if short > long && self.last_signal != SignalKind::Buy {
            SignalKind::Buy
        } else if short < long && self.last_signal != SignalKind::Sell {
            SignalKind::Sell
        } else {
            return None;
        };
        self.last_signal = kind;
        Some(SignalEvent {
            symbol,
            kind,
            confidence: 1.0,
            quantity: self.order_quantity,
            ..SignalEvent::default()
        })
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        // Calculators are rebuilt empty; signal state and parameters carry
        // over so a clone resumes the same regime.
        Box::new(Self {
            name: self.name.clone(),
            short: IncrementalSma::new(self.short.window),
            long: IncrementalSma::new(self.long.window),
            last_signal: self.last_signal,
            symbol: self.symbol,
            order_quantity: self.order_quantity,
            parameters: self.parameters.clone(),
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_parameter(&mut self, key: &str, value: f64) {
        self.parameters.insert(key.to_string(), value);
        match key {
            "short_window" if value >= 1.0 => self.short.reset(value as usize),
            "long_window" if value >= 1.0 => self.long.reset(value as usize),
            "order_quantity" if value > 0.0 => self.order_quantity = value,
            _ => {}
        }
    }

    fn get_parameter(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).copied()
    }
}
