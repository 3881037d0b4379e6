//! Component-level acceptance tests for the engine crates

mod ledger_tests {
    use common::{Clock, Side, Symbol};
    use engine::config::PortfolioConfig;
    use engine::portfolio::Portfolio;

    const INITIAL: f64 = 100_000.0;

    fn portfolio() -> Portfolio {
        Portfolio::new(
            PortfolioConfig {
                initial_capital: INITIAL,
            },
            Clock::new(),
        )
    }

    fn fill(side: Side, quantity: f64, price: f64, commission: f64) -> bus::FillEvent {
        bus::FillEvent {
            symbol: Symbol::new(1),
            quantity,
            price,
            commission,
            side,
            ..bus::FillEvent::default()
        }
    }

    fn bar(close: f64) -> bus::MarketBarEvent {
        bus::MarketBarEvent {
            symbol: Symbol::new(1),
            close,
            ..bus::MarketBarEvent::default()
        }
    }

    /// Open a long, mark it up, then close it: the cash, PnL and equity
    /// arithmetic must come out exactly.
    #[test]
    fn test_open_mark_close_cycle() {
        let ledger = portfolio();

        ledger.apply_fill(&fill(Side::Buy, 100.0, 150.0, 5.0));
        ledger.on_bar(&bar(155.0));

        assert!((ledger.available_cash() - (INITIAL - 15_005.0)).abs() < 1e-9);
        let position = ledger.snapshot(Symbol::new(1)).expect("open");
        assert!((position.entry_price - 150.0).abs() < 1e-9);
        assert!((position.unrealized_pnl - 500.0).abs() < 1e-9);
        assert!((ledger.total_equity() - (INITIAL - 15_005.0 + 15_500.0)).abs() < 1e-9);

        ledger.apply_fill(&fill(Side::Sell, 100.0, 160.0, 5.0));
        assert!((ledger.available_cash() - (INITIAL - 15_005.0 + 15_995.0)).abs() < 1e-9);
        assert!(ledger.snapshot(Symbol::new(1)).is_err(), "flat removed");
        assert!((ledger.total_realized_pnl() - 1_000.0).abs() < 1e-9);
        assert!(ledger.total_unrealized_pnl().abs() < 1e-9);
    }

    /// Buy and sell the same quantity at the same price with no commission:
    /// a perfect wash restores every aggregate.
    #[test]
    fn test_commission_free_wash_trade() {
        let ledger = portfolio();
        ledger.apply_fill(&fill(Side::Buy, 100.0, 42.0, 0.0));
        ledger.apply_fill(&fill(Side::Sell, 100.0, 42.0, 0.0));

        assert!((ledger.available_cash() - INITIAL).abs() < 1e-9);
        assert!(ledger.total_realized_pnl().abs() < 1e-9);
        assert!(ledger.total_unrealized_pnl().abs() < 1e-9);
        assert!((ledger.total_equity() - INITIAL).abs() < 1e-9);
        assert_eq!(ledger.position_count(), 0);
    }
}

mod book_tests {
    use common::Side;
    use lob::{BookConfig, OrderBook, OrderStatus};

    fn book() -> OrderBook {
        OrderBook::new(BookConfig::default())
    }

    /// The canonical two-level sweep: 30 at 100.00 and 80 at 100.01, hit by
    /// a 100-lot market buy.
    #[test]
    fn test_two_level_market_sweep() {
        let book = book();
        let empty = book.match_market_order(Side::Buy, 100.0, None);
        assert!(empty.matched_quantity.abs() < 1e-9);
        assert!(!empty.fully_filled);

        book.add_order(1, Side::Sell, 100.00, 30.0).expect("valid");
        book.add_order(2, Side::Sell, 100.01, 80.0).expect("valid");

        let result = book.match_market_order(Side::Buy, 100.0, None);
        assert!((result.matched_quantity - 100.0).abs() < 1e-9);
        let vwap = (30.0 * 100.00 + 70.0 * 100.01) / 100.0;
        assert!((result.average_price - vwap).abs() < 1e-9);
        assert_eq!(result.orders_matched, 2);
        assert!(result.fully_filled);

        assert_eq!(book.order_status(1), None, "fully filled and retired");
        assert_eq!(book.order_status(2), Some(OrderStatus::Partial));
        assert!((book.order_remaining(2).expect("resting") - 10.0).abs() < 1e-9);
    }

    /// A confirmed cancel means later matches can never touch that id.
    #[test]
    fn test_cancel_excludes_order_from_matching() {
        let book = book();
        book.add_order(10, Side::Sell, 50.0, 40.0).expect("valid");
        book.add_order(11, Side::Sell, 50.0, 40.0).expect("valid");
        assert!(book.cancel_order(10));

        let result = book.match_market_order(Side::Buy, 80.0, None);
        assert!((result.matched_quantity - 40.0).abs() < 1e-9);
        assert!(!result.matched_order_ids.contains(&10));
        assert!(!book.cancel_order(10));
    }

    /// add then cancel leaves the aggregate exactly where it started.
    #[test]
    fn test_add_cancel_restores_aggregates() {
        let book = book();
        book.add_order(1, Side::Buy, 99.0, 10.0).expect("valid");
        let bid_qty = book.total_bid_quantity();
        let orders = book.total_orders();

        book.add_order(2, Side::Buy, 99.0, 25.0).expect("valid");
        assert!(book.cancel_order(2));

        assert!((book.total_bid_quantity() - bid_qty).abs() < 1e-9);
        assert_eq!(book.total_orders(), orders);
    }
}

mod bus_parity_tests {
    use bus::{BusConfig, Event, EventBus, EventPool, MarketBarEvent, WaitStrategyKind};
    use common::{Clock, Symbol};
    use rstest::rstest;

    /// Both backends honor the same publish/consume contract for a burst
    /// that wraps the ring several times.
    #[rstest]
    #[case(true, WaitStrategyKind::Busy)]
    #[case(true, WaitStrategyKind::Yield)]
    #[case(true, WaitStrategyKind::Sleep)]
    #[case(true, WaitStrategyKind::Block)]
    #[case(false, WaitStrategyKind::Yield)]
    fn test_backend_contract(#[case] use_ring: bool, #[case] wait: WaitStrategyKind) {
        let config = BusConfig {
            capacity: 16,
            wait_strategy: wait,
            use_ring,
            ..BusConfig::default()
        };
        let bus = EventBus::new(config);
        let pool = EventPool::new(config.pool, Clock::new());

        for round in 0..10u32 {
            for i in 0..16u32 {
                let bar = MarketBarEvent {
                    symbol: Symbol::new(round * 100 + i),
                    ..MarketBarEvent::default()
                };
                assert!(bus.try_publish(pool.acquire_bar(bar).expect("pool has room")));
            }
            assert_eq!(bus.size(), 16);
            for i in 0..16u32 {
                let handle = bus.try_consume().expect("published event");
                match pool.take(handle) {
                    Event::Bar(bar) => assert_eq!(bar.symbol, Symbol::new(round * 100 + i)),
                    other => panic!("unexpected variant: {other:?}"),
                }
            }
            assert!(bus.empty());
        }
        assert_eq!(pool.live(), 0);
    }
}

mod config_tests {
    use engine::EngineConfig;

    /// Configurations survive a serde round trip unchanged.
    #[test]
    fn test_config_serde_roundtrip() -> anyhow::Result<()> {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config)?;
        let decoded: EngineConfig = serde_json::from_str(&json)?;
        assert_eq!(config, decoded);
        Ok(())
    }
}
