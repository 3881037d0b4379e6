//! Producer-consumer stress tests for the ring-backed bus

use bus::{
    BusConfig, Event, EventBus, EventPool, EventPoolConfig, MarketBarEvent, WaitStrategyKind,
};
use common::{Clock, Symbol};
use std::sync::Arc;
use std::thread;

/// One producer, one consumer, capacity 1024, one million events: nothing is
/// lost, nothing is duplicated, order is preserved, and the cursors meet at
/// the end.
#[test]
fn test_spsc_million_events() {
    const COUNT: u64 = 1_000_000;

    let config = BusConfig {
        capacity: 1024,
        wait_strategy: WaitStrategyKind::Yield,
        ..BusConfig::default()
    };
    let bus = Arc::new(EventBus::new(config));
    // Pool sized so in-flight events (bounded by ring capacity) always fit.
    let pool = Arc::new(EventPool::new(
        EventPoolConfig {
            chunk_capacity: 2048,
            max_chunks: 4,
        },
        Clock::new(),
    ));

    let producer = {
        let bus = Arc::clone(&bus);
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            for i in 0..COUNT {
                #[allow(clippy::cast_precision_loss)]
                let close = i as f64;
                let bar = MarketBarEvent {
                    symbol: Symbol::new(1),
                    close,
                    ..MarketBarEvent::default()
                };
                let handle = loop {
                    // Backpressure surfaces as pool pressure too: retry until
                    // the consumer recycles cells.
                    match pool.acquire_bar(bar) {
                        Some(handle) => break handle,
                        None => thread::yield_now(),
                    }
                };
                bus.publish(handle);
            }
        })
    };

    for expected in 0..COUNT {
        let handle = loop {
            match bus.try_consume() {
                Some(handle) => break handle,
                None => std::hint::spin_loop(),
            }
        };
        match pool.take(handle) {
            Event::Bar(bar) => {
                #[allow(clippy::cast_precision_loss)]
                let want = expected as f64;
                assert!(
                    (bar.close - want).abs() < f64::EPSILON,
                    "event {expected} out of order: got close {}",
                    bar.close
                );
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    producer.join().expect("producer panicked");
    assert!(bus.empty());
    assert_eq!(pool.live(), 0);
    assert_eq!(bus.cursor_sequence(), COUNT as i64 - 1);
    assert_eq!(bus.consumer_sequence(), COUNT as i64 - 1);
}

/// Two producers in multi-producer mode: per-producer FIFO holds and every
/// event is delivered exactly once.
#[test]
fn test_mpsc_per_producer_fifo() {
    const PER_PRODUCER: u64 = 50_000;

    let config = BusConfig {
        capacity: 1024,
        wait_strategy: WaitStrategyKind::Yield,
        multi_producer: true,
        ..BusConfig::default()
    };
    let bus = Arc::new(EventBus::new(config));
    let pool = Arc::new(EventPool::new(
        EventPoolConfig {
            chunk_capacity: 2048,
            max_chunks: 4,
        },
        Clock::new(),
    ));

    let spawn_producer = |id: u32| {
        let bus = Arc::clone(&bus);
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                #[allow(clippy::cast_precision_loss)]
                let close = i as f64;
                let bar = MarketBarEvent {
                    symbol: Symbol::new(id),
                    close,
                    ..MarketBarEvent::default()
                };
                let handle = loop {
                    match pool.acquire_bar(bar) {
                        Some(handle) => break handle,
                        None => thread::yield_now(),
                    }
                };
                bus.publish(handle);
            }
        })
    };
    let producers = [spawn_producer(0), spawn_producer(1)];

    let mut next_expected = [0u64, 0u64];
    for _ in 0..2 * PER_PRODUCER {
        let handle = loop {
            match bus.try_consume() {
                Some(handle) => break handle,
                None => std::hint::spin_loop(),
            }
        };
        match pool.take(handle) {
            Event::Bar(bar) => {
                let producer = bar.symbol.0 as usize;
                #[allow(clippy::cast_precision_loss)]
                let want = next_expected[producer] as f64;
                assert!(
                    (bar.close - want).abs() < f64::EPSILON,
                    "producer {producer} order violated"
                );
                next_expected[producer] += 1;
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    for producer in producers {
        producer.join().expect("producer panicked");
    }
    assert_eq!(next_expected, [PER_PRODUCER, PER_PRODUCER]);
    assert_eq!(pool.live(), 0);
}
