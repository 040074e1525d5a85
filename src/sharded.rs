//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the sharded book variant: each side is partitioned
// into independent sub-books by order id so cancellations on distinct ids
// (mostly) touch distinct locks. A small cached best price avoids rescanning
// every shard on each probe; matching restores global price-time priority by
// merging the per-shard queues at the best price.
//
// | Name                   | Description                                      | Key Methods       |
// |------------------------|--------------------------------------------------|-------------------|
// | ShardedBookSide        | N independent BookSides + best-price cache       | add_order         |
// |                        |                                                  | remove_order      |
// |                        |                                                  | orders_at_best    |
// | ShardedEngine          | Base engine semantics over sharded sides         | process           |
// |                        |                                                  | cancel (&self)    |
// | ShardedAdaptiveEngine  | Regime tracking layered over the sharded engine  | process           |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use num_traits::ToPrimitive;

use crate::adaptive::{RegimeTracker, volume_at_top};
use crate::book::BookSide;
use crate::config::{ConfigError, EngineConfig};
use crate::level::Discipline;
use crate::matching::{fok_executable_volume, price_limit};
use crate::snapshot::{BookSnapshot, MetricsSample, RegimeStatistics};
use crate::types::{MarketRegime, Order, OrderKind, Side, Trade};

/// Default shard count per side. Power of two so routing is a mask.
pub const DEFAULT_SHARDS: usize = 8;

struct BestCache {
    price: Option<Decimal>,
    valid: bool,
}

/// One side of the book partitioned into independent shards.
///
/// The shard index is a stable function of the order id alone, so the same id
/// always routes to the same shard regardless of side, and a cancel only
/// acquires the owning shard's lock.
pub struct ShardedBookSide {
    side: Side,
    shards: Vec<BookSide>,
    mask: u128,
    cache: Mutex<BestCache>,
}

impl ShardedBookSide {
    /// Creates a sharded side. `num_shards` is rounded up to a power of two
    /// (minimum 1) so the modulus reduces to a mask.
    pub fn new(side: Side, num_shards: usize) -> Self {
        let count = num_shards.max(1).next_power_of_two();
        Self {
            side,
            shards: (0..count).map(|_| BookSide::for_shard(side)).collect(),
            mask: (count - 1) as u128,
            cache: Mutex::new(BestCache { price: None, valid: false }),
        }
    }

    /// Number of shards.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn shard_index(&self, order_id: Uuid) -> usize {
        (order_id.as_u128() & self.mask) as usize
    }

    fn shard_for(&self, order_id: Uuid) -> &BookSide {
        &self.shards[self.shard_index(order_id)]
    }

    fn invalidate_cache(&self) {
        self.cache.lock().valid = false;
    }

    /// Routes the order to its shard and invalidates the best-price cache.
    pub fn add_order(&self, order: Order) {
        self.shard_for(order.id).add_order(order);
        self.invalidate_cache();
    }

    /// Removes an order from its owning shard. Only that shard's lock (and,
    /// briefly, the cache lock) is taken, so distinct ids cancel in parallel.
    pub fn remove_order(&self, order_id: Uuid) -> bool {
        let removed = self.shard_for(order_id).remove_order(order_id);
        if removed {
            self.invalidate_cache();
        }
        removed
    }

    /// Best price across all shards, served from the cache when valid. The
    /// refresh scans shards in index order under the cache lock.
    pub fn best_price(&self) -> Option<Decimal> {
        let mut cache = self.cache.lock();
        if cache.valid {
            return cache.price;
        }
        let mut best: Option<Decimal> = None;
        for shard in &self.shards {
            let Some(price) = shard.best_price() else { continue };
            best = Some(match (best, self.side) {
                (None, _) => price,
                (Some(current), Side::Buy) => current.max(price),
                (Some(current), Side::Sell) => current.min(price),
            });
        }
        cache.price = best;
        cache.valid = true;
        best
    }

    /// Aggregated `(price, volume)` depth across shards, best-first,
    /// truncated to `n` rows. Same-price volumes from different shards are
    /// summed before truncation.
    pub fn depth(&self, n: usize) -> Vec<(Decimal, u64)> {
        let mut merged: HashMap<Decimal, u64> = HashMap::new();
        for shard in &self.shards {
            for (price, volume) in shard.depth(usize::MAX) {
                *merged.entry(price).or_insert(0) += volume;
            }
        }
        let mut rows: Vec<(Decimal, u64)> = merged.into_iter().collect();
        match self.side {
            Side::Buy => rows.sort_by(|a, b| b.0.cmp(&a.0)),
            Side::Sell => rows.sort_by(|a, b| a.0.cmp(&b.0)),
        }
        rows.truncate(n);
        rows
    }

    /// All orders resting at the global best price, merged across shards in
    /// ascending `(timestamp, sequence)` order, restoring global time
    /// priority despite the partitioning.
    pub fn orders_at_best(&self) -> Vec<Order> {
        let Some(best) = self.best_price() else {
            return Vec::new();
        };
        let mut orders: Vec<Order> = self
            .shards
            .iter()
            .flat_map(|shard| shard.orders_at(best))
            .collect();
        orders.sort_by_key(|o| (o.timestamp, o.sequence));
        orders
    }

    /// Applies a fill to a specific resting order through its owning shard.
    pub fn fill_order(&self, order_id: Uuid, quantity: u64) -> Option<crate::book::BookFill> {
        let fill = self.shard_for(order_id).fill_order(order_id, quantity);
        if fill.is_some() {
            self.invalidate_cache();
        }
        fill
    }

    /// Cumulative visible volume at prices acceptable to the given limit,
    /// summed across shards. Used by FOK admission.
    pub fn visible_volume_within(&self, limit: Option<Decimal>) -> u64 {
        self.shards.iter().map(|s| s.visible_volume_within(limit)).sum()
    }

    /// Rebinds the in-level ordering discipline of every shard; the levels
    /// resort lazily on their next access.
    pub fn set_discipline(&self, discipline: Discipline) {
        for shard in &self.shards {
            shard.set_discipline(discipline);
        }
    }

    /// Whether an order with this id rests on this side.
    pub fn contains(&self, order_id: Uuid) -> bool {
        self.shard_for(order_id).contains(order_id)
    }

    /// Total resting orders across shards.
    pub fn order_count(&self) -> usize {
        self.shards.iter().map(BookSide::order_count).sum()
    }

    /// Per-shard (orders, levels) counts.
    pub fn shard_stats(&self) -> Vec<ShardStats> {
        self.shards
            .iter()
            .enumerate()
            .map(|(shard, side)| ShardStats {
                shard,
                orders: side.order_count(),
                levels: side.level_count(),
            })
            .collect()
    }

    /// Structural invariants of every shard.
    pub fn check_invariants(&self) -> bool {
        self.shards.iter().all(BookSide::check_invariants)
    }
}

/// Resting-order and level counts for one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    /// Shard index.
    pub shard: usize,
    /// Orders resting in the shard.
    pub orders: usize,
    /// Non-empty price levels in the shard.
    pub levels: usize,
}

/// Statistics for the sharded engine, including per-shard occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedStatistics {
    /// Shards per side.
    pub num_shards: usize,
    /// Orders admitted since engine start.
    pub total_orders: u64,
    /// Trades produced since engine start.
    pub total_trades: u64,
    /// Per-shard stats for the bid side.
    pub bid_shards: Vec<ShardStats>,
    /// Per-shard stats for the ask side.
    pub ask_shards: Vec<ShardStats>,
}

/// Matching engine over sharded book sides. Admission is single-writer
/// (`process` takes `&mut self`); cancellation takes `&self` and may be
/// called from multiple threads concurrently.
pub struct ShardedEngine {
    bids: ShardedBookSide,
    asks: ShardedBookSide,
    order_log: Vec<Order>,
    trade_log: Vec<Trade>,
    next_sequence: u64,
}

impl Default for ShardedEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl ShardedEngine {
    /// Creates an engine with `num_shards` partitions per side.
    pub fn new(num_shards: usize) -> Self {
        Self {
            bids: ShardedBookSide::new(Side::Buy, num_shards),
            asks: ShardedBookSide::new(Side::Sell, num_shards),
            order_log: Vec::new(),
            trade_log: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Admits an order; same contract as the base engine.
    pub fn process(&mut self, mut order: Order) -> Vec<Trade> {
        order.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.order_log.push(order.clone());

        if order.is_expired(chrono::Utc::now()) {
            debug!(order_id = %order.id, "order dropped: expired");
            return Vec::new();
        }

        if order.kind == OrderKind::Fok {
            let available = self.opposite(order.side).visible_volume_within(price_limit(&order));
            if !fok_executable_volume(&order, available) {
                debug!(order_id = %order.id, "FOK order rejected: insufficient visible depth");
                return Vec::new();
            }
        }

        let trades = self.match_incoming(&mut order);

        if order.remaining() > 0 && matches!(order.kind, OrderKind::Limit | OrderKind::Iceberg) {
            self.own_side(order.side).add_order(order);
        }

        self.trade_log.extend(trades.iter().cloned());
        trades
    }

    /// Pulls the globally-earliest order at the best crossing price, fills it
    /// through its owning shard, and re-polls, preserving price-time
    /// priority despite the partitioning.
    fn match_incoming(&self, incoming: &mut Order) -> Vec<Trade> {
        let limit = price_limit(incoming);
        let opposite = self.opposite(incoming.side);
        let mut trades = Vec::new();

        while incoming.remaining() > 0 {
            let Some(best) = opposite.best_price() else { break };
            if let Some(limit) = limit {
                let crosses = match incoming.side {
                    Side::Buy => best <= limit,
                    Side::Sell => best >= limit,
                };
                if !crosses {
                    break;
                }
            }

            let candidates = opposite.orders_at_best();
            let Some(target) = candidates.first() else { break };
            let Some(fill) = opposite.fill_order(target.id, incoming.remaining()) else {
                break;
            };

            incoming.filled += fill.quantity;
            if incoming.kind != OrderKind::Iceberg {
                incoming.displayed = incoming.remaining();
            }
            let trade = match incoming.side {
                Side::Buy => Trade::fill(incoming.id, fill.order_id, fill.price, fill.quantity),
                Side::Sell => Trade::fill(fill.order_id, incoming.id, fill.price, fill.quantity),
            };
            trades.push(trade);
        }

        trades
    }

    fn own_side(&self, side: Side) -> &ShardedBookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn opposite(&self, side: Side) -> &ShardedBookSide {
        self.own_side(side.opposite())
    }

    /// Cancels a resting order. Takes `&self`: each call locks only the
    /// owning shard, so callers may cancel from multiple threads.
    pub fn cancel(&self, order_id: Uuid) -> bool {
        self.bids.remove_order(order_id) || self.asks.remove_order(order_id)
    }

    /// The sharded bid side.
    pub fn bids(&self) -> &ShardedBookSide {
        &self.bids
    }

    /// The sharded ask side.
    pub fn asks(&self) -> &ShardedBookSide {
        &self.asks
    }

    /// Best bid price, if any.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.best_price()
    }

    /// Best ask price, if any.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.best_price()
    }

    /// Aggregated depth snapshot.
    pub fn snapshot(&self, levels: usize) -> BookSnapshot {
        BookSnapshot::new(self.bids.depth(levels), self.asks.depth(levels))
    }

    /// Counters plus per-shard occupancy.
    pub fn statistics(&self) -> ShardedStatistics {
        ShardedStatistics {
            num_shards: self.bids.num_shards(),
            total_orders: self.order_log.len() as u64,
            total_trades: self.trade_log.len() as u64,
            bid_shards: self.bids.shard_stats(),
            ask_shards: self.asks.shard_stats(),
        }
    }

    /// All trades produced so far, in execution order.
    pub fn trade_log(&self) -> &[Trade] {
        &self.trade_log
    }
}

/// Sharded engine with regime tracking: parallel cancellation from the
/// sharding combined with the adaptive engines' discipline rebinding.
pub struct ShardedAdaptiveEngine {
    engine: ShardedEngine,
    tracker: RegimeTracker,
}

impl ShardedAdaptiveEngine {
    /// Creates a sharded adaptive engine.
    pub fn new(num_shards: usize, config: EngineConfig) -> Self {
        Self {
            engine: ShardedEngine::new(num_shards),
            tracker: RegimeTracker::new(config),
        }
    }

    /// Admits an order with regime tracking; matching semantics are those of
    /// the sharded engine.
    pub fn process(&mut self, order: Order) -> Vec<Trade> {
        if !self.tracker.active() {
            return self.engine.process(order);
        }

        let side = order.side;
        let quantity = order.quantity;

        self.tracker.observe(self.mid_price_f64(), quantity, side, self.spread_f64());

        let classification = self.tracker.classify(
            self.engine.best_bid().and_then(|p| p.to_f64()),
            self.engine.best_ask().and_then(|p| p.to_f64()),
            volume_at_top(&self.engine.bids().depth(1)),
            volume_at_top(&self.engine.asks().depth(1)),
        );
        if let Some(discipline) = classification {
            self.engine.bids().set_discipline(discipline);
            self.engine.asks().set_discipline(discipline);
        }

        let trades = self.engine.process(order);
        let spread = self.spread().unwrap_or(Decimal::ZERO);
        self.tracker.record_sample(side, quantity, &trades, spread);
        trades
    }

    /// Cancels a resting order; successful cancels feed the detector.
    pub fn cancel(&mut self, order_id: Uuid) -> bool {
        let cancelled = self.engine.cancel(order_id);
        if cancelled {
            self.tracker.record_cancellation();
        }
        cancelled
    }

    fn mid_price_f64(&self) -> f64 {
        match (self.engine.best_bid(), self.engine.best_ask()) {
            (Some(bid), Some(ask)) => ((bid + ask) / Decimal::TWO).to_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn spread(&self) -> Option<Decimal> {
        match (self.engine.best_bid(), self.engine.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    fn spread_f64(&self) -> f64 {
        self.spread().and_then(|s| s.to_f64()).unwrap_or(0.0)
    }

    /// The regime currently in force.
    pub fn current_regime(&self) -> MarketRegime {
        self.tracker.current_regime()
    }

    /// Number of regime transitions so far.
    pub fn regime_change_count(&self) -> u64 {
        self.tracker.regime_change_count()
    }

    /// Regime distribution, history and timing.
    pub fn regime_statistics(&self) -> RegimeStatistics {
        self.tracker.regime_statistics()
    }

    /// Replaces the configuration; rebuilds the detector.
    pub fn update_config(&mut self, config: EngineConfig) {
        self.tracker.update_config(config);
    }

    /// The active configuration.
    pub fn get_config(&self) -> &EngineConfig {
        self.tracker.config()
    }

    /// Adjusts one regime gate; unknown kinds are a recoverable error.
    pub fn set_regime_threshold(&mut self, kind: &str, value: f64) -> Result<(), ConfigError> {
        self.tracker.set_threshold(kind, value)
    }

    /// Bypasses the detector entirely when enabled.
    pub fn set_benchmark_mode(&mut self, enabled: bool) {
        self.tracker.set_benchmark_mode(enabled);
    }

    /// Metrics samples recorded so far.
    pub fn metrics_history(&self) -> &[MetricsSample] {
        self.tracker.metrics_history()
    }

    /// Aggregated depth snapshot.
    pub fn snapshot(&self, levels: usize) -> BookSnapshot {
        self.engine.snapshot(levels)
    }

    /// Counters plus per-shard occupancy.
    pub fn statistics(&self) -> ShardedStatistics {
        self.engine.statistics()
    }

    /// The underlying sharded engine (books and logs).
    pub fn engine(&self) -> &ShardedEngine {
        &self.engine
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_shard_count_rounds_to_power_of_two() {
        let side = ShardedBookSide::new(Side::Buy, 5);
        assert_eq!(side.num_shards(), 8);
        let side = ShardedBookSide::new(Side::Buy, 0);
        assert_eq!(side.num_shards(), 1);
    }

    #[test]
    fn test_best_price_across_shards() {
        let asks = ShardedBookSide::new(Side::Sell, 4);
        for price in [dec!(102.0), dec!(100.0), dec!(101.0)] {
            asks.add_order(Order::limit(Side::Sell, price, 10).unwrap());
        }
        assert_eq!(asks.best_price(), Some(dec!(100.0)));

        let bids = ShardedBookSide::new(Side::Buy, 4);
        for price in [dec!(98.0), dec!(100.0), dec!(99.0)] {
            bids.add_order(Order::limit(Side::Buy, price, 10).unwrap());
        }
        assert_eq!(bids.best_price(), Some(dec!(100.0)));
    }

    #[test]
    fn test_cache_invalidated_on_removal() {
        let asks = ShardedBookSide::new(Side::Sell, 4);
        let best = Order::limit(Side::Sell, dec!(100.0), 10).unwrap();
        let best_id = best.id;
        asks.add_order(best);
        asks.add_order(Order::limit(Side::Sell, dec!(101.0), 10).unwrap());

        assert_eq!(asks.best_price(), Some(dec!(100.0)));
        assert!(asks.remove_order(best_id));
        assert_eq!(asks.best_price(), Some(dec!(101.0)));
        assert!(asks.check_invariants());
    }

    #[test]
    fn test_depth_merges_same_price_across_shards() {
        let asks = ShardedBookSide::new(Side::Sell, 8);
        for _ in 0..10 {
            asks.add_order(Order::limit(Side::Sell, dec!(100.0), 5).unwrap());
        }
        asks.add_order(Order::limit(Side::Sell, dec!(101.0), 3).unwrap());

        let depth = asks.depth(5);
        assert_eq!(depth[0], (dec!(100.0), 50));
        assert_eq!(depth[1], (dec!(101.0), 3));
    }

    #[test]
    fn test_orders_at_best_restores_time_priority() {
        let asks = ShardedBookSide::new(Side::Sell, 8);
        let mut expected = Vec::new();
        for i in 0..10u64 {
            let mut order = Order::limit(Side::Sell, dec!(100.0), 5).unwrap();
            order.sequence = i + 1;
            order.timestamp =
                chrono::DateTime::from_timestamp_millis(1_700_000_000_000 + i as i64).unwrap();
            expected.push(order.id);
            asks.add_order(order);
        }
        let merged = asks.orders_at_best();
        let ids: Vec<Uuid> = merged.iter().map(|o| o.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_sharded_matching_matches_base_fifo() {
        let mut engine = ShardedEngine::new(8);
        let b1 = Order::limit(Side::Buy, dec!(100.0), 100).unwrap();
        let b2 = Order::limit(Side::Buy, dec!(100.0), 200).unwrap();
        let (b1_id, b2_id) = (b1.id, b2.id);
        engine.process(b1);
        engine.process(b2);

        let trades = engine.process(Order::limit(Side::Sell, dec!(100.0), 150).unwrap());
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].buy_order_id, b1_id);
        assert_eq!(trades[0].quantity, 100);
        assert_eq!(trades[1].buy_order_id, b2_id);
        assert_eq!(trades[1].quantity, 50);
    }

    #[test]
    fn test_sharded_market_and_residual_policy() {
        let mut engine = ShardedEngine::new(4);
        engine.process(Order::limit(Side::Sell, dec!(100.0), 30).unwrap());

        let trades = engine.process(Order::market(Side::Buy, 50).unwrap());
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(100.0));
        assert_eq!(trades[0].quantity, 30);
        assert_eq!(engine.best_bid(), None);
    }

    #[test]
    fn test_sharded_fok_admission() {
        let mut engine = ShardedEngine::new(4);
        engine.process(Order::limit(Side::Sell, dec!(100.0), 50).unwrap());

        let trades = engine.process(Order::fok(Side::Buy, dec!(100.0), 100).unwrap());
        assert!(trades.is_empty());
        assert_eq!(engine.asks().order_count(), 1);
    }

    #[test]
    fn test_parallel_cancellation() {
        let mut engine = ShardedEngine::new(8);
        let mut ids = Vec::new();
        for i in 0..200u64 {
            let order =
                Order::limit(Side::Buy, dec!(50.0) + Decimal::from(i), 10).unwrap();
            ids.push(order.id);
            engine.process(order);
        }

        let engine_ref = &engine;
        std::thread::scope(|scope| {
            for chunk in ids.chunks(50) {
                scope.spawn(move || {
                    for id in chunk {
                        assert!(engine_ref.cancel(*id));
                    }
                });
            }
        });

        assert_eq!(engine.bids().order_count(), 0);
        assert_eq!(engine.best_bid(), None);
        assert!(engine.bids().check_invariants());
    }

    #[test]
    fn test_sharded_adaptive_transition_spans_shards() {
        let mut engine = ShardedAdaptiveEngine::new(
            4,
            EngineConfig { detection_interval: 4, window_size: 4, ..EngineConfig::default() },
        );
        // One-sided flow: the 4th-order gate flips the regime.
        for i in 0..4u64 {
            engine.process(Order::limit(Side::Buy, dec!(100.0) - Decimal::from(i), 10).unwrap());
        }
        assert_eq!(engine.current_regime(), MarketRegime::Directional);
        assert_eq!(engine.regime_change_count(), 1);
        // No resting order was lost across the transition.
        assert_eq!(engine.engine().bids().order_count(), 4);
        assert!(engine.engine().bids().check_invariants());
    }

    #[test]
    fn test_sharded_adaptive_benchmark_mode() {
        let mut engine = ShardedAdaptiveEngine::new(
            4,
            EngineConfig { detection_interval: 2, window_size: 2, ..EngineConfig::default() },
        );
        engine.set_benchmark_mode(true);
        for _ in 0..8 {
            engine.process(Order::limit(Side::Buy, dec!(100.0), 10).unwrap());
        }
        assert_eq!(engine.current_regime(), MarketRegime::Normal);
        assert!(engine.metrics_history().is_empty());
    }

    #[test]
    fn test_statistics_include_shards() {
        let mut engine = ShardedEngine::new(4);
        for i in 0..20u64 {
            engine.process(Order::limit(Side::Buy, dec!(50.0) + Decimal::from(i), 10).unwrap());
        }
        let stats = engine.statistics();
        assert_eq!(stats.num_shards, 4);
        assert_eq!(stats.total_orders, 20);
        let total: usize = stats.bid_shards.iter().map(|s| s.orders).sum();
        assert_eq!(total, 20);
    }
}
