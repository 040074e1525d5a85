//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the adaptive matching engine: the base engine plus
// regime tracking. Every accepted order feeds the detector; when a gated
// classification produces a different regime, the in-level ordering
// discipline of both sides is rebound lazily and the transition is recorded.
//
// The regime bookkeeping itself lives in `RegimeTracker`, which is shared
// with the sharded adaptive engine.
//
// | Name             | Description                                      | Key Methods           |
// |------------------|--------------------------------------------------|-----------------------|
// | RegimeTracker    | Detector + transition history + metric samples   | classify              |
// | AdaptiveEngine   | Regime-aware engine over MatchEngine             | process               |
// |                  |                                                  | cancel                |
// |                  |                                                  | regime_statistics     |
// |                  |                                                  | update_config         |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::engine::MatchEngine;
use crate::level::Discipline;
use crate::regime::{MarketMetrics, RegimeDetector};
use crate::snapshot::{BookSnapshot, EngineStatistics, MetricsSample, RegimeChange, RegimeStatistics};
use crate::types::{MarketRegime, Order, Side, Trade};

/// The in-level ordering discipline bound to each regime.
pub fn discipline_for(regime: MarketRegime) -> Discipline {
    match regime {
        MarketRegime::Normal | MarketRegime::HighFrequency => Discipline::Fifo,
        MarketRegime::HighVolatility | MarketRegime::Illiquid => Discipline::SizeTime,
        MarketRegime::Directional => Discipline::Hybrid,
    }
}

/// Regime bookkeeping shared by the adaptive engines: the detector, the
/// transition history and counters, and the periodic metric samples.
pub(crate) struct RegimeTracker {
    detector: RegimeDetector,
    config: EngineConfig,
    current_regime: MarketRegime,
    regime_change_count: u64,
    last_regime_change: DateTime<Utc>,
    regime_history: Vec<RegimeChange>,
    metrics_history: Vec<MetricsSample>,
    benchmark_mode: bool,
}

impl RegimeTracker {
    pub(crate) fn new(config: EngineConfig) -> Self {
        Self {
            detector: RegimeDetector::new(&config),
            config,
            current_regime: MarketRegime::Normal,
            regime_change_count: 0,
            last_regime_change: Utc::now(),
            regime_history: Vec::new(),
            metrics_history: Vec::new(),
            benchmark_mode: false,
        }
    }

    /// Whether the detector participates at all (regime detection enabled
    /// and benchmark mode off).
    pub(crate) fn active(&self) -> bool {
        self.config.enable_regime_detection && !self.benchmark_mode
    }

    pub(crate) fn observe(&mut self, mid_price: f64, volume: u64, side: Side, spread: f64) {
        self.detector.observe(mid_price, volume, side, spread);
    }

    /// Runs a gated classification. Returns the discipline to rebind when a
    /// transition fired, `None` otherwise.
    pub(crate) fn classify(
        &mut self,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
        buy_volume_at_top: u64,
        sell_volume_at_top: u64,
    ) -> Option<Discipline> {
        if !self.detector.should_detect() {
            return None;
        }
        let new_regime =
            self.detector.detect(best_bid, best_ask, buy_volume_at_top, sell_volume_at_top);
        if new_regime == self.current_regime {
            return None;
        }

        let change = RegimeChange {
            timestamp: Utc::now(),
            from: self.current_regime,
            to: new_regime,
        };
        info!(from = ?change.from, to = ?change.to, "regime transition");
        self.regime_history.push(change);
        self.current_regime = new_regime;
        self.regime_change_count += 1;
        self.last_regime_change = change.timestamp;
        Some(discipline_for(new_regime))
    }

    /// Appends a metric sample at the configured recording interval
    /// (`max(1, detection_interval / 10)` observations).
    pub(crate) fn record_sample(
        &mut self,
        side: Side,
        quantity: u64,
        trades: &[Trade],
        spread: Decimal,
    ) {
        if !self.config.enable_metrics_recording {
            return;
        }
        let record_interval = (self.config.detection_interval / 10).max(1);
        if self.detector.observation_count() % record_interval != 0 {
            return;
        }
        self.metrics_history.push(MetricsSample {
            timestamp: Utc::now(),
            regime: self.current_regime,
            side,
            quantity,
            trades_generated: trades.len(),
            volume_executed: trades.iter().map(|t| t.quantity).sum(),
            spread,
        });
    }

    pub(crate) fn record_cancellation(&mut self) {
        if self.active() {
            self.detector.record_cancellation();
        }
    }

    pub(crate) fn current_regime(&self) -> MarketRegime {
        self.current_regime
    }

    pub(crate) fn regime_change_count(&self) -> u64 {
        self.regime_change_count
    }

    pub(crate) fn regime_statistics(&self) -> RegimeStatistics {
        let mut distribution = std::collections::HashMap::new();
        for change in &self.regime_history {
            *distribution.entry(change.to).or_insert(0) += 1;
        }
        let elapsed = Utc::now() - self.last_regime_change;
        RegimeStatistics {
            total_changes: self.regime_change_count,
            current_regime: self.current_regime,
            regime_distribution: distribution,
            regime_history: self.regime_history.clone(),
            time_since_last_change: elapsed.num_milliseconds() as f64 / 1000.0,
        }
    }

    pub(crate) fn update_config(&mut self, config: EngineConfig) {
        self.detector = RegimeDetector::new(&config);
        self.config = config;
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn set_threshold(&mut self, kind: &str, value: f64) -> Result<(), ConfigError> {
        self.config.set_threshold(kind, value)?;
        self.detector.set_threshold(kind, value)
    }

    pub(crate) fn set_benchmark_mode(&mut self, enabled: bool) {
        self.benchmark_mode = enabled;
    }

    pub(crate) fn metrics_history(&self) -> &[MetricsSample] {
        &self.metrics_history
    }

    pub(crate) fn market_metrics(&mut self) -> MarketMetrics {
        self.detector.metrics_summary()
    }
}

/// Matching engine that adapts its in-level ordering discipline to the
/// detected market regime.
pub struct AdaptiveEngine {
    engine: MatchEngine,
    tracker: RegimeTracker,
}

impl Default for AdaptiveEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl AdaptiveEngine {
    /// Creates an adaptive engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: MatchEngine::new(),
            tracker: RegimeTracker::new(config),
        }
    }

    /// Admits an order. Feeds the detector, executes a regime transition if a
    /// gated classification changed, then matches the order, so a single
    /// order is matched entirely under one discipline.
    ///
    /// # Arguments
    /// * `order` - The order to process
    ///
    /// # Returns
    /// The trades generated by matching the order, possibly empty
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

    /// Cancels a resting order and, on success, records the cancellation with
    /// the detector (cancel churn drives the HIGH_FREQUENCY classification).
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

    /// Replaces the configuration and rebuilds the detector with it. Window
    /// contents and counters restart; the current regime and its history are
    /// kept.
    pub fn update_config(&mut self, config: EngineConfig) {
        self.tracker.update_config(config);
    }

    /// The active configuration.
    pub fn get_config(&self) -> &EngineConfig {
        self.tracker.config()
    }

    /// Adjusts one regime gate without resetting the detector windows.
    /// Unknown kinds are a recoverable error.
    pub fn set_regime_threshold(&mut self, kind: &str, value: f64) -> Result<(), ConfigError> {
        self.tracker.set_threshold(kind, value)
    }

    /// When enabled the detector is bypassed entirely; exists to quantify the
    /// adaptive overhead against the base kernel.
    pub fn set_benchmark_mode(&mut self, enabled: bool) {
        self.tracker.set_benchmark_mode(enabled);
    }

    /// Current detector metrics (recomputed if stale).
    pub fn market_metrics(&mut self) -> MarketMetrics {
        self.tracker.market_metrics()
    }

    /// Metrics samples recorded so far.
    pub fn metrics_history(&self) -> &[MetricsSample] {
        self.tracker.metrics_history()
    }

    /// Aggregated depth snapshot.
    pub fn snapshot(&self, levels: usize) -> BookSnapshot {
        self.engine.snapshot(levels)
    }

    /// Counters over the append-only logs.
    pub fn statistics(&self) -> EngineStatistics {
        self.engine.statistics()
    }

    /// The underlying base engine (books and logs).
    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }
}

/// Volume of the first depth row, zero for an empty side.
pub(crate) fn volume_at_top(depth: &[(Decimal, u64)]) -> u64 {
    depth.first().map(|(_, volume)| *volume).unwrap_or(0)
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
