//! Backtest engine: the event dispatch loop
//!
//! One consumer pulls events off the bus in bounded batches and routes them:
//! bars mark the portfolio and drive strategies, signals go to the execution
//! layer, fills go to the ledger. Every event is taken out of its pool cell
//! at dispatch and the cell recycles immediately, so steady state allocates
//! nothing. Pool exhaustion is fatal backpressure: the loop logs and halts.

use bus::{Event, EventBus, EventHandle, EventPool, MarketBarEvent, SignalEvent, SignalKind};
use common::{Clock, Symbol};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::execution::ExecutionSimulator;
use crate::latency::{LatencyStats, LatencyTracker};
use crate::portfolio::{FLAT_EPSILON, Portfolio};
use crate::strategy::Strategy;

/// Fatal engine failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// An event pool hit its growth cap; the run cannot continue without
    /// losing events
    #[error("event pool exhausted, halting dispatch")]
    PoolExhausted,

    /// The bus rejected a dispatcher re-enqueue; capacity is too small for
    /// the configured cascade depth
    #[error("bus full while re-enqueueing, increase bus capacity")]
    BusFull,
}

/// Final accounting of a completed run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Events dispatched
    pub events_processed: u64,
    /// Wall time spent in the run loop
    pub elapsed: Duration,
}

/// Event-driven backtesting engine
///
/// Producers feed bars through [`BacktestEngine::publish_bar`] (or the bus
/// handle directly); the engine consumes, dispatches and recycles. The
/// default single-producer single-consumer configuration replays
/// deterministically.
pub struct BacktestEngine {
    config: EngineConfig,
    clock: Clock,
    bus: Arc<EventBus>,
    pool: Arc<EventPool>,
    portfolio: Arc<Portfolio>,
    executor: Arc<ExecutionSimulator>,
    strategies: FxHashMap<Symbol, (u32, Box<dyn Strategy>)>,
    next_strategy_id: u32,
    last_close: FxHashMap<Symbol, f64>,
    latency: Option<LatencyTracker>,
    stop_requested: Arc<AtomicBool>,
    events_processed: u64,
}

impl BacktestEngine {
    /// Assemble an engine from `config`
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let config = config.validated();
        let clock = Clock::new();
        let bus = Arc::new(EventBus::new(config.bus));
        let pool = Arc::new(EventPool::new(config.bus.pool, clock));
        let portfolio = Arc::new(Portfolio::new(config.portfolio, clock));
        let executor = Arc::new(ExecutionSimulator::new(config.execution, clock));
        let latency = config.dispatch.enable_latency_monitoring.then(|| {
            LatencyTracker::new(
                config.dispatch.latency_sample_capacity,
                config.dispatch.latency_spike_threshold_ns(),
            )
        });
        tracing::info!(
            capacity = bus.capacity(),
            latency_monitoring = config.dispatch.enable_latency_monitoring,
            "engine assembled"
        );
        Self {
            config,
            clock,
            bus,
            pool,
            portfolio,
            executor,
            strategies: FxHashMap::default(),
            next_strategy_id: 0,
            last_close: FxHashMap::default(),
            latency,
            stop_requested: Arc::new(AtomicBool::new(false)),
            events_processed: 0,
        }
    }

    /// Register a strategy for `symbol`, returning its registry id
    pub fn add_strategy(&mut self, symbol: Symbol, strategy: Box<dyn Strategy>) -> u32 {
        let id = self.next_strategy_id;
        self.next_strategy_id += 1;
        tracing::info!(%symbol, strategy = strategy.name(), id, "strategy registered");
        self.strategies.insert(symbol, (id, strategy));
        id
    }

    /// The event bus, for external producers
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The event pool backing the bus
    #[must_use]
    pub fn pool(&self) -> Arc<EventPool> {
        Arc::clone(&self.pool)
    }

    /// The portfolio ledger
    #[must_use]
    pub fn portfolio(&self) -> Arc<Portfolio> {
        Arc::clone(&self.portfolio)
    }

    /// The execution layer
    #[must_use]
    pub fn executor(&self) -> Arc<ExecutionSimulator> {
        Arc::clone(&self.executor)
    }

    /// Shareable cooperative stop flag
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    /// Request a cooperative stop; in-flight events finish dispatching
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Events dispatched so far
    #[must_use]
    pub const fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Latency statistics when monitoring is enabled
    #[must_use]
    pub fn latency_stats(&self) -> Option<LatencyStats> {
        self.latency.as_ref().map(LatencyTracker::stats)
    }

    /// Pool a market bar and publish it, blocking under backpressure
    ///
    /// # Errors
    /// [`EngineError::PoolExhausted`] when the bar pool hit its growth cap.
    pub fn publish_bar(
        &self,
        symbol: Symbol,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<(), EngineError> {
        let bar = MarketBarEvent {
            symbol,
            open,
            high,
            low,
            close,
            volume,
            ..MarketBarEvent::default()
        };
        let handle = self
            .pool
            .acquire_bar(bar)
            .ok_or(EngineError::PoolExhausted)?;
        self.bus.publish(handle);
        Ok(())
    }

    /// Dispatch until the bus is drained, including cascades the dispatch
    /// itself re-enqueues. Returns the number of events processed.
    ///
    /// # Errors
    /// Fatal backpressure ([`EngineError::PoolExhausted`],
    /// [`EngineError::BusFull`]) halts the drain.
    pub fn drain(&mut self) -> Result<u64, EngineError> {
        let mut processed = 0u64;
        while let Some(handle) = self.bus.try_consume() {
            self.dispatch(handle)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Run until a stop is requested and the bus is drained
    ///
    /// Pulls up to `max_events_per_batch` events or `max_batch_duration`
    /// per batch, whichever comes first, then yields. The stop flag is
    /// polled at batch boundaries; in-flight events always finish.
    ///
    /// # Errors
    /// Fatal backpressure halts the run and surfaces the cause.
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let start_count = self.events_processed;
        let max_batch = self.config.dispatch.max_events_per_batch;
        let max_duration = self.config.dispatch.max_batch_duration();
        tracing::info!("engine run started");

        loop {
            let batch_started = Instant::now();
            let mut batch_events = 0usize;
            while batch_events < max_batch && batch_started.elapsed() < max_duration {
                match self.bus.try_consume() {
                    Some(handle) => {
                        self.dispatch(handle)?;
                        batch_events += 1;
                    }
                    None => break,
                }
            }

            if self.stop_requested.load(Ordering::Acquire) && self.bus.empty() {
                break;
            }
            if batch_events == 0 {
                std::thread::yield_now();
            }
        }

        let summary = RunSummary {
            events_processed: self.events_processed - start_count,
            elapsed: started.elapsed(),
        };
        #[allow(clippy::cast_precision_loss)]
        let events_per_sec = summary.events_processed as f64 / summary.elapsed.as_secs_f64().max(1e-9);
        tracing::info!(
            events = summary.events_processed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            events_per_sec,
            "engine run complete"
        );
        Ok(summary)
    }

    fn dispatch(&mut self, handle: EventHandle) -> Result<(), EngineError> {
        let started = self.latency.is_some().then(|| self.clock.mono_ns());

        match self.pool.take(handle) {
            Event::Bar(bar) => self.on_bar(&bar)?,
            Event::Signal(signal) => self.on_signal(&signal)?,
            Event::Fill(fill) => self.portfolio.apply_fill(&fill),
        }
        self.events_processed += 1;

        if let (Some(tracker), Some(started)) = (self.latency.as_mut(), started) {
            tracker.record(self.clock.mono_ns() - started);
        }
        Ok(())
    }

    fn on_bar(&mut self, bar: &MarketBarEvent) -> Result<(), EngineError> {
        self.last_close.insert(bar.symbol, bar.close);
        self.portfolio.on_bar(bar);
        self.executor.update_market_data(bar.symbol, bar.close);

        let emitted = match self.strategies.get_mut(&bar.symbol) {
            Some((id, strategy)) => {
                strategy.on_bar(bar);
                strategy.maybe_emit().map(|mut signal| {
                    signal.strategy_id = *id;
                    signal.symbol = bar.symbol;
                    signal
                })
            }
            None => None,
        };
        if let Some(signal) = emitted {
            let handle = self
                .pool
                .acquire_signal(signal)
                .ok_or(EngineError::PoolExhausted)?;
            self.enqueue(handle)?;
        }
        Ok(())
    }

    fn on_signal(&mut self, signal: &SignalEvent) -> Result<(), EngineError> {
        let Some(reference_price) = self.last_close.get(&signal.symbol).copied() else {
            tracing::warn!(symbol = %signal.symbol, "signal before any market data, dropped");
            return Ok(());
        };

        let resolved = match signal.kind {
            SignalKind::Hold => return Ok(()),
            SignalKind::Exit => match self.resolve_exit(signal) {
                Some(directional) => directional,
                None => return Ok(()),
            },
            SignalKind::Buy | SignalKind::Sell => *signal,
        };

        if let Some(fill) = self.executor.execute(&resolved, reference_price) {
            let handle = self
                .pool
                .acquire_fill(fill)
                .ok_or(EngineError::PoolExhausted)?;
            self.enqueue(handle)?;
        }
        Ok(())
    }

    /// Translate an EXIT into the directional order that flattens the open
    /// position, if one exists
    fn resolve_exit(&self, signal: &SignalEvent) -> Option<SignalEvent> {
        let position = self.portfolio.snapshot(signal.symbol).ok()?;
        if position.quantity.abs() < FLAT_EPSILON {
            return None;
        }
        Some(SignalEvent {
            kind: if position.quantity > 0.0 {
                SignalKind::Sell
            } else {
                SignalKind::Buy
            },
            quantity: position.quantity.abs(),
            ..*signal
        })
    }

    /// Re-enqueue from inside the dispatch: must not block, because this
    /// thread is also the consumer
    fn enqueue(&self, handle: EventHandle) -> Result<(), EngineError> {
        if self.bus.try_publish(handle) {
            Ok(())
        } else {
            tracing::error!("bus full during dispatcher re-enqueue");
            self.pool.release(handle);
            Err(EngineError::BusFull)
        }
    }
}
