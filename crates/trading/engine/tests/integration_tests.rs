//! End-to-end engine tests: bars in, fills and equity out

use bus::{BusConfig, SignalEvent, SignalKind, WaitStrategyKind};
use common::{Side, Symbol};
use engine::{
    BacktestEngine, EngineConfig, ExecutionConfig, PortfolioConfig, SmaCrossoverStrategy,
};
use std::sync::atomic::Ordering;

const SYM: Symbol = Symbol::new(1);

fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn frictionless_config() -> EngineConfig {
    init_logging();
    EngineConfig {
        bus: BusConfig {
            capacity: 64,
            ..BusConfig::default()
        },
        execution: ExecutionConfig {
            commission_per_share: 0.0,
            commission_percentage: 0.0,
            bid_ask_spread_bps: 0.0,
            slippage_factor: 0.0,
            ..ExecutionConfig::default()
        },
        portfolio: PortfolioConfig {
            initial_capital: 100_000.0,
        },
        ..EngineConfig::default()
    }
}

fn publish_closes(engine: &BacktestEngine, closes: &[f64]) {
    for &close in closes {
        engine
            .publish_bar(SYM, close, close, close, close, 1_000.0)
            .expect("bar pool sized for the test");
    }
}

#[test]
fn test_bar_without_strategy_or_position() {
    let mut engine = BacktestEngine::new(frictionless_config());
    publish_closes(&engine, &[100.0]);

    let processed = engine.drain().expect("drain succeeds");
    assert_eq!(processed, 1);

    let portfolio = engine.portfolio();
    assert_eq!(portfolio.equity_curve(), vec![100_000.0]);
    assert_eq!(portfolio.position_count(), 0);
    assert!(portfolio.trade_history().is_empty());
    assert_eq!(engine.pool().live(), 0, "every event recycled");
}

#[test]
fn test_sma_crossover_produces_exactly_one_fill() {
    let mut engine = BacktestEngine::new(frictionless_config());
    engine.add_strategy(SYM, Box::new(SmaCrossoverStrategy::new(2, 3)));

    // Rising closes: the short average crosses above the long once the long
    // window fills, producing one BUY signal and one fill through the bus.
    publish_closes(&engine, &[100.0, 101.0, 102.0, 103.0, 104.0]);
    let processed = engine.drain().expect("drain succeeds");

    // 5 bars + 1 signal + 1 fill.
    assert_eq!(processed, 7);

    let portfolio = engine.portfolio();
    let history = portfolio.trade_history();
    assert_eq!(history.len(), 1, "sustained trend emits exactly one signal");
    assert_eq!(history[0].side, Side::Buy);
    assert!((history[0].quantity - 100.0).abs() < 1e-9);

    let position = portfolio.snapshot(SYM).expect("long position open");
    assert!((position.quantity - 100.0).abs() < 1e-9);
    assert_eq!(engine.executor().stats().total_executions, 1);
    assert_eq!(engine.pool().live(), 0);
}

#[test]
fn test_round_trip_flat_restores_equity_identity() {
    let mut engine = BacktestEngine::new(frictionless_config());
    engine.add_strategy(SYM, Box::new(SmaCrossoverStrategy::new(2, 3)));

    // Up-leg opens a long, down-leg crosses back and flips direction; drive
    // the position through both regimes and verify the ledger stays coherent.
    publish_closes(
        &engine,
        &[100.0, 101.0, 102.0, 103.0, 100.0, 96.0, 92.0, 90.0],
    );
    let _ = engine.drain().expect("drain succeeds");

    let portfolio = engine.portfolio();
    let history = portfolio.trade_history();
    assert_eq!(history.len(), 2, "one BUY, one SELL");
    assert_eq!(history[0].side, Side::Buy);
    assert_eq!(history[1].side, Side::Sell);

    portfolio.recalculate();
    let market_value: f64 = portfolio
        .snapshot_all()
        .iter()
        .map(|p| (p.quantity * p.mark_price).abs())
        .sum();
    assert!(
        (portfolio.total_equity() - (portfolio.available_cash() + market_value)).abs() < 1e-6,
        "equity = cash + market value"
    );
    assert_eq!(engine.pool().live(), 0);
}

#[test]
fn test_exit_signal_flattens_position() {
    let mut engine = BacktestEngine::new(frictionless_config());

    // Open a long by injecting a signal directly, then EXIT it.
    publish_closes(&engine, &[150.0]);
    let buy = SignalEvent {
        symbol: SYM,
        kind: SignalKind::Buy,
        quantity: 100.0,
        confidence: 1.0,
        ..SignalEvent::default()
    };
    let pool = engine.pool();
    let bus = engine.bus();
    bus.publish(pool.acquire_signal(buy).expect("pool has room"));
    let _ = engine.drain().expect("drain succeeds");
    assert!(engine.portfolio().has_position(SYM));

    let exit = SignalEvent {
        kind: SignalKind::Exit,
        ..buy
    };
    bus.publish(pool.acquire_signal(exit).expect("pool has room"));
    let _ = engine.drain().expect("drain succeeds");

    let portfolio = engine.portfolio();
    assert!(!portfolio.has_position(SYM), "EXIT flattened the long");
    assert_eq!(portfolio.trade_history().len(), 2);
    assert!((portfolio.available_cash() - 100_000.0).abs() < 1e-6);
}

#[test]
fn test_exit_without_position_is_silent() {
    let mut engine = BacktestEngine::new(frictionless_config());
    publish_closes(&engine, &[100.0]);
    let exit = SignalEvent {
        symbol: SYM,
        kind: SignalKind::Exit,
        quantity: 50.0,
        ..SignalEvent::default()
    };
    let pool = engine.pool();
    engine
        .bus()
        .publish(pool.acquire_signal(exit).expect("pool has room"));
    let _ = engine.drain().expect("drain succeeds");
    assert!(engine.portfolio().trade_history().is_empty());
}

#[test]
fn test_latency_monitoring_records_each_event() {
    let mut config = frictionless_config();
    config.dispatch.enable_latency_monitoring = true;
    config.dispatch.latency_spike_threshold_us = 1_000_000;
    let mut engine = BacktestEngine::new(config);

    publish_closes(&engine, &[100.0, 101.0, 102.0]);
    let _ = engine.drain().expect("drain succeeds");

    let stats = engine.latency_stats().expect("monitoring enabled");
    assert_eq!(stats.count, 3);
    assert!(stats.max_ns >= stats.min_ns);
    assert_eq!(stats.spikes, 0);
}

#[test]
fn test_order_book_mode_with_market_maker() {
    let mut config = frictionless_config();
    config.execution = ExecutionConfig {
        use_order_book: true,
        enable_market_making: true,
        market_maker_order_count: 3,
        market_maker_size: 500.0,
        market_maker_refresh_rate: 1.0,
        commission_per_share: 0.0,
        commission_percentage: 0.0,
        ..ExecutionConfig::default()
    };
    let mut engine = BacktestEngine::new(config);
    engine.add_strategy(SYM, Box::new(SmaCrossoverStrategy::new(2, 3)));

    publish_closes(&engine, &[100.0, 101.0, 102.0, 103.0, 104.0]);
    let _ = engine.drain().expect("drain succeeds");

    let history = engine.portfolio().trade_history();
    assert_eq!(history.len(), 1, "signal filled against maker liquidity");
    // The buy lifted the cheapest seeded asks, which sit just above the
    // first bar's close.
    assert!(history[0].price >= 100.0 && history[0].price <= 105.0);

    let stats = engine.executor().stats();
    assert!(stats.maker_quotes_added >= 6);
    assert_eq!(stats.maker_fills, 1);
    assert!(engine.executor().book(SYM).is_some());
}

#[test]
fn test_run_consumes_live_producer_until_stopped() {
    let mut config = frictionless_config();
    config.bus.capacity = 1024;
    config.bus.wait_strategy = WaitStrategyKind::Yield;
    let mut engine = BacktestEngine::new(config);

    const COUNT: u64 = 100_000;
    let bus = engine.bus();
    let pool = engine.pool();
    let stop = engine.stop_handle();

    let producer = std::thread::spawn(move || {
        for i in 0..COUNT {
            #[allow(clippy::cast_precision_loss)]
            let close = 100.0 + (i % 10) as f64;
            let bar = bus::MarketBarEvent {
                symbol: SYM,
                close,
                ..bus::MarketBarEvent::default()
            };
            let handle = loop {
                match pool.acquire_bar(bar) {
                    Some(handle) => break handle,
                    None => std::thread::yield_now(),
                }
            };
            bus.publish(handle);
        }
        stop.store(true, Ordering::Release);
    });

    let summary = engine.run().expect("run completes");
    producer.join().expect("producer panicked");

    assert_eq!(summary.events_processed, COUNT);
    assert_eq!(engine.events_processed(), COUNT);
    assert!(engine.bus().empty());
    assert_eq!(engine.pool().live(), 0);
    assert_eq!(engine.bus().cursor_sequence(), COUNT as i64 - 1);
    assert_eq!(engine.bus().consumer_sequence(), COUNT as i64 - 1);
}
