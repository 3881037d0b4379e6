//! Performance benchmarks for the backtesting engine

// Benchmarks are not production code - unwrap/expect are acceptable here
#![allow(clippy::unwrap_used, clippy::expect_used)]

use bus::BusConfig;
use common::{Clock, Symbol};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use engine::config::PortfolioConfig;
use engine::portfolio::Portfolio;
use engine::{BacktestEngine, EngineConfig, SmaCrossoverStrategy};

const SYM: Symbol = Symbol::new(1);

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("bar_through_engine", |b| {
        let config = EngineConfig {
            bus: BusConfig {
                capacity: 4096,
                ..BusConfig::default()
            },
            ..EngineConfig::default()
        };
        let mut engine = BacktestEngine::new(config);
        engine.add_strategy(SYM, Box::new(SmaCrossoverStrategy::new(10, 30)));

        let mut close = 100.0;
        b.iter(|| {
            close += 0.1;
            engine
                .publish_bar(SYM, close, close, close, close, 1_000.0)
                .expect("pool sized for bench");
            black_box(engine.drain().expect("drain succeeds"));
        });
    });

    group.finish();
}

fn bench_portfolio(c: &mut Criterion) {
    let mut group = c.benchmark_group("portfolio");

    group.bench_function("apply_fill", |b| {
        let portfolio = Portfolio::new(
            PortfolioConfig {
                initial_capital: 1e9,
            },
            Clock::new(),
        );
        let fill = bus::FillEvent {
            symbol: SYM,
            quantity: 1.0,
            price: 100.0,
            commission: 0.0,
            side: common::Side::Buy,
            ..bus::FillEvent::default()
        };
        b.iter(|| portfolio.apply_fill(black_box(&fill)));
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_portfolio);
criterion_main!(benches);
