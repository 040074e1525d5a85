//--------------------------------------------------------------------------------------------------
// INTEGRATION SCENARIOS
//--------------------------------------------------------------------------------------------------
// Cross-variant scenarios: the same order flows driven through the base,
// adaptive and sharded engines, checking trade-for-trade agreement and the
// structural invariants of the books after mixed workloads.
//--------------------------------------------------------------------------------------------------

use matchbook::{
    AdaptiveEngine, EngineConfig, MarketRegime, MatchEngine, Order, ShardedEngine, Side, Trade,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fills(trades: &[Trade]) -> Vec<(Decimal, u64)> {
    trades.iter().map(|t| (t.price, t.quantity)).collect()
}

/// A deterministic mixed flow of limit and market orders.
fn mixed_flow(count: usize, seed: u64) -> Vec<Order> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut orders = Vec::with_capacity(count);
    for i in 0..count {
        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        let qty = rng.gen_range(1..=50u64);
        let order = if i % 10 == 9 {
            Order::market(side, qty).unwrap()
        } else {
            let offset = Decimal::from(rng.gen_range(0..20u32)) * dec!(0.25);
            let price = match side {
                Side::Buy => dec!(98.0) + offset,
                Side::Sell => dec!(102.0) - offset,
            };
            Order::limit(side, price, qty).unwrap()
        };
        orders.push(order);
    }
    orders
}

#[test]
fn fifo_at_same_price_across_variants() {
    // S1: two resting buys at one price, a partial sell sweeps them in order.
    let run = |mut process: Box<dyn FnMut(Order) -> Vec<Trade>>| -> Vec<(Decimal, u64)> {
        process(Order::limit(Side::Buy, dec!(100.0), 100).unwrap());
        process(Order::limit(Side::Buy, dec!(100.0), 200).unwrap());
        fills(&process(Order::limit(Side::Sell, dec!(100.0), 150).unwrap()))
    };

    let mut base = MatchEngine::new();
    let mut adaptive = AdaptiveEngine::default();
    let mut sharded = ShardedEngine::new(8);

    let expected = vec![(dec!(100.0), 100), (dec!(100.0), 50)];
    assert_eq!(run(Box::new(move |o| base.process(o))), expected);
    assert_eq!(run(Box::new(move |o| adaptive.process(o))), expected);
    assert_eq!(run(Box::new(move |o| sharded.process(o))), expected);
}

#[test]
fn market_order_prints_at_resting_price() {
    // S2: a market sell against a resting buy trades at the bid.
    let mut engine = MatchEngine::new();
    engine.process(Order::limit(Side::Buy, dec!(100.0), 100).unwrap());
    let trades = engine.process(Order::market(Side::Sell, 50).unwrap());
    assert_eq!(fills(&trades), vec![(dec!(100.0), 50)]);
}

#[test]
fn sharded_and_base_agree_on_mixed_flow() {
    // Property 7: identical trade streams for any sequence without
    // concurrent cancellations.
    init_tracing();
    let mut base = MatchEngine::new();
    let mut sharded = ShardedEngine::new(8);

    for order in mixed_flow(600, 42) {
        let base_trades = base.process(order.clone());
        let sharded_trades = sharded.process(order);
        assert_eq!(fills(&base_trades), fills(&sharded_trades));
    }

    assert_eq!(base.best_bid(), sharded.best_bid());
    assert_eq!(base.best_ask(), sharded.best_ask());
    assert_eq!(base.bids().depth(10), sharded.bids().depth(10));
    assert_eq!(base.asks().depth(10), sharded.asks().depth(10));

    assert!(base.bids().check_invariants());
    assert!(base.asks().check_invariants());
    assert!(sharded.bids().check_invariants());
    assert!(sharded.asks().check_invariants());
}

#[test]
fn sharded_cancel_equivalence() {
    // S6: 1000 resting orders at distinct prices, a deterministic half
    // cancelled; best price and depth must match the base engine.
    init_tracing();
    let mut base = MatchEngine::new();
    let mut sharded = ShardedEngine::new(8);
    let mut ids = Vec::new();

    for i in 0..1000u64 {
        let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
        let price = match side {
            Side::Buy => dec!(1000.0) - Decimal::from(i),
            Side::Sell => dec!(2000.0) + Decimal::from(i),
        };
        let order = Order::limit(side, price, 10).unwrap();
        ids.push(order.id);
        base.process(order.clone());
        sharded.process(order);
    }

    for (i, id) in ids.iter().enumerate() {
        if i % 2 == 0 {
            assert!(base.cancel(*id));
            assert!(sharded.cancel(*id));
        }
    }

    assert_eq!(base.best_bid(), sharded.best_bid());
    assert_eq!(base.best_ask(), sharded.best_ask());
    assert_eq!(base.bids().depth(20), sharded.bids().depth(20));
    assert_eq!(base.asks().depth(20), sharded.asks().depth(20));
    assert!(sharded.bids().check_invariants());
    assert!(sharded.asks().check_invariants());
}

#[test]
fn books_never_cross_at_rest() {
    // Property 3 over a mixed random flow.
    let mut engine = MatchEngine::new();
    for order in mixed_flow(500, 7) {
        engine.process(order);
        if let (Some(bid), Some(ask)) = (engine.best_bid(), engine.best_ask()) {
            assert!(bid < ask, "book crossed at rest: bid {bid} >= ask {ask}");
        }
    }
}

#[test]
fn trades_per_order_are_price_monotonic() {
    // Property 2: a single incoming buy's trades never improve in price.
    let mut engine = MatchEngine::new();
    for i in 0..5u64 {
        engine.process(
            Order::limit(Side::Sell, dec!(100.0) + Decimal::from(i), 20).unwrap(),
        );
    }
    let trades = engine.process(Order::limit(Side::Buy, dec!(110.0), 90).unwrap());
    for pair in trades.windows(2) {
        assert!(pair[0].price <= pair[1].price);
    }
}

#[test]
fn conservation_of_withdrawn_volume() {
    // Property 1: executed volume equals the volume withdrawn from the book.
    let mut engine = MatchEngine::new();
    let resting_volume = 300u64;
    for _ in 0..3 {
        engine.process(Order::limit(Side::Sell, dec!(100.0), 100).unwrap());
    }

    let trades = engine.process(Order::limit(Side::Buy, dec!(100.0), 250).unwrap());
    let executed: u64 = trades.iter().map(|t| t.quantity).sum();
    let left_on_book = engine.asks().volume_at(dec!(100.0)).unwrap_or(0);
    assert_eq!(executed, 250);
    assert_eq!(resting_volume - left_on_book, executed);
}

#[test]
fn volatile_flow_reaches_high_volatility_within_one_interval() {
    // Property 9: a price series with CV above the gate flips the regime at
    // the next classification point.
    let mut engine = AdaptiveEngine::new(EngineConfig {
        window_size: 20,
        detection_interval: 20,
        ..EngineConfig::default()
    });

    // Wide standing quotes that are never crossed.
    engine.process(Order::limit(Side::Buy, dec!(50.0), 1).unwrap());
    engine.process(Order::limit(Side::Sell, dec!(200.0), 1).unwrap());

    // Alternate full crossings far apart: the midpoint swings every cycle.
    for i in 0..9u64 {
        let price = if i % 2 == 0 { dec!(140.0) } else { dec!(100.0) };
        engine.process(Order::limit(Side::Buy, price, 5).unwrap());
        let trades = engine.process(Order::limit(Side::Sell, price, 5).unwrap());
        assert_eq!(trades.len(), 1);
    }

    assert_eq!(engine.current_regime(), MarketRegime::HighVolatility);
}

#[test]
fn regime_transition_preserves_book_cardinality() {
    // Property 10: no resting order is lost across a transition.
    let mut engine = AdaptiveEngine::new(EngineConfig {
        window_size: 10,
        detection_interval: 10,
        ..EngineConfig::default()
    });

    for i in 0..9u64 {
        engine.process(Order::limit(Side::Buy, dec!(90.0) - Decimal::from(i), 10).unwrap());
    }
    let bids_before = engine.engine().bids().order_count();

    // Gate order; the one-sided flow forces a transition.
    engine.process(Order::limit(Side::Buy, dec!(80.0), 10).unwrap());
    assert_ne!(engine.current_regime(), MarketRegime::Normal);
    assert_eq!(engine.engine().bids().order_count(), bids_before + 1);
    assert!(engine.engine().bids().check_invariants());
}
