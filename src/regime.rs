//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the market regime detector: bounded windows of
// recent prices, volumes and spreads, reduced to a handful of metrics and
// classified into one of five regimes. Classification is gated: it runs only
// every `detection_interval` observations and the cached regime is returned
// in between. The window statistics are maintained incrementally so the
// per-order cost stays O(1).
//
// | Name            | Description                                            |
// |-----------------|--------------------------------------------------------|
// | MarketMetrics   | Derived metrics used by the classification rules       |
// | RegimeDetector  | Windowed observation state + gated classifier          |
//--------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

use tracing::trace;

use crate::config::{ConfigError, EngineConfig};
use crate::types::{MarketRegime, Side};

/// Derived market metrics computed over the observation windows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MarketMetrics {
    /// Coefficient of variation of windowed prices (σ / mean).
    pub volatility: f64,
    /// Mean of windowed spreads.
    pub spread: f64,
    /// `|buy_volume − sell_volume| / (buy_volume + sell_volume)`.
    pub volume_imbalance: f64,
    /// Imbalance of the top-of-book volumes passed to the classifier.
    pub order_book_imbalance: f64,
    /// `cancellation_count / total_orders` (cancellations count in both).
    pub cancellation_rate: f64,
    /// Midpoint used for the latest classification.
    pub mid_price: f64,
}

/// Gated regime detector over bounded observation windows.
pub struct RegimeDetector {
    detection_interval: u64,
    window_size: usize,
    volatility_threshold: f64,
    spread_threshold: f64,
    imbalance_threshold: f64,
    cancellation_threshold: f64,

    observation_count: u64,
    last_regime: MarketRegime,

    price_window: VecDeque<f64>,
    spread_window: VecDeque<f64>,
    volume_window: VecDeque<u64>,

    // Running sums; each window insertion drops the evicted element's
    // contribution and adds the new one.
    price_sum: f64,
    price_sq_sum: f64,
    spread_sum: f64,

    cancellation_count: u64,
    total_orders: u64,
    buy_volume: u64,
    sell_volume: u64,

    cached_metrics: Option<MarketMetrics>,
    metrics_dirty: bool,
}

impl RegimeDetector {
    /// Creates a detector from the engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            detection_interval: config.detection_interval.max(1),
            window_size: config.window_size.max(2),
            volatility_threshold: config.volatility_threshold,
            spread_threshold: config.spread_threshold,
            imbalance_threshold: config.imbalance_threshold,
            cancellation_threshold: config.cancellation_threshold,
            observation_count: 0,
            last_regime: MarketRegime::Normal,
            price_window: VecDeque::with_capacity(config.window_size),
            spread_window: VecDeque::with_capacity(config.window_size),
            volume_window: VecDeque::with_capacity(config.window_size),
            price_sum: 0.0,
            price_sq_sum: 0.0,
            spread_sum: 0.0,
            cancellation_count: 0,
            total_orders: 0,
            buy_volume: 0,
            sell_volume: 0,
            cached_metrics: None,
            metrics_dirty: true,
        }
    }

    /// Feeds one observation: the current midpoint, the order's quantity and
    /// side, and the current spread.
    pub fn observe(&mut self, mid_price: f64, volume: u64, side: Side, spread: f64) {
        self.observation_count += 1;
        self.total_orders += 1;

        match side {
            Side::Buy => self.buy_volume += volume,
            Side::Sell => self.sell_volume += volume,
        }

        if self.price_window.len() == self.window_size {
            let old_price = self.price_window.pop_front().unwrap_or(0.0);
            self.price_sum -= old_price;
            self.price_sq_sum -= old_price * old_price;
            let old_spread = self.spread_window.pop_front().unwrap_or(0.0);
            self.spread_sum -= old_spread;
            self.volume_window.pop_front();
        }

        self.price_window.push_back(mid_price);
        self.spread_window.push_back(spread);
        self.volume_window.push_back(volume);

        self.price_sum += mid_price;
        self.price_sq_sum += mid_price * mid_price;
        self.spread_sum += spread;
        self.metrics_dirty = true;
    }

    /// Records an external cancellation. Cancellations contribute to the
    /// denominator of the cancellation rate as well as the numerator.
    pub fn record_cancellation(&mut self) {
        self.cancellation_count += 1;
        self.total_orders += 1;
        self.metrics_dirty = true;
    }

    /// Whether the next `detect` call falls on a classification gate.
    pub fn should_detect(&self) -> bool {
        self.observation_count > 0 && self.observation_count % self.detection_interval == 0
    }

    /// Classifies the current market conditions. Between gate points the
    /// cached regime is returned; before a full window has been collected the
    /// regime is NORMAL.
    pub fn detect(
        &mut self,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
        buy_volume_at_top: u64,
        sell_volume_at_top: u64,
    ) -> MarketRegime {
        if !self.should_detect() {
            return self.last_regime;
        }
        if self.price_window.len() < self.window_size {
            return MarketRegime::Normal;
        }

        let metrics =
            self.compute_metrics(best_bid, best_ask, buy_volume_at_top, sell_volume_at_top);

        // A wide top-of-book range relative to the midpoint is a second
        // volatility proxy alongside the windowed coefficient of variation.
        let mid_range_vol = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) if metrics.mid_price > 0.0 => {
                (ask - bid).abs() / metrics.mid_price
            }
            _ => 0.0,
        };

        // Rules in priority order; first match wins.
        let regime = if metrics.volatility > self.volatility_threshold
            || mid_range_vol > self.volatility_threshold
        {
            MarketRegime::HighVolatility
        } else if metrics.volume_imbalance > self.imbalance_threshold {
            MarketRegime::Directional
        } else if metrics.spread > self.spread_threshold {
            MarketRegime::Illiquid
        } else if metrics.cancellation_rate > self.cancellation_threshold {
            MarketRegime::HighFrequency
        } else {
            MarketRegime::Normal
        };

        trace!(?regime, volatility = metrics.volatility, spread = metrics.spread, "regime gate");
        self.last_regime = regime;
        regime
    }

    fn compute_metrics(
        &mut self,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
        buy_volume_at_top: u64,
        sell_volume_at_top: u64,
    ) -> MarketMetrics {
        if !self.metrics_dirty {
            if let Some(cached) = self.cached_metrics {
                return cached;
            }
        }

        let n = self.price_window.len() as f64;
        let volatility = if n < 2.0 {
            0.0
        } else {
            let mean = self.price_sum / n;
            let variance = self.price_sq_sum / n - mean * mean;
            if mean > 0.0 { variance.max(0.0).sqrt() / mean } else { 0.0 }
        };

        let spread = if n > 0.0 { self.spread_sum / n } else { 0.0 };

        let total_volume = self.buy_volume + self.sell_volume;
        let volume_imbalance = if total_volume > 0 {
            (self.buy_volume as f64 - self.sell_volume as f64).abs() / total_volume as f64
        } else {
            0.0
        };

        let top_total = buy_volume_at_top + sell_volume_at_top;
        let order_book_imbalance = if top_total > 0 {
            (buy_volume_at_top as f64 - sell_volume_at_top as f64).abs() / top_total as f64
        } else {
            0.0
        };

        let cancellation_rate = if self.total_orders > 0 {
            self.cancellation_count as f64 / self.total_orders as f64
        } else {
            0.0
        };

        let mid_price = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => (bid + ask) / 2.0,
            _ => 0.0,
        };

        let metrics = MarketMetrics {
            volatility,
            spread,
            volume_imbalance,
            order_book_imbalance,
            cancellation_rate,
            mid_price,
        };
        self.cached_metrics = Some(metrics);
        self.metrics_dirty = false;
        metrics
    }

    /// The regime produced by the most recent gate.
    pub fn last_regime(&self) -> MarketRegime {
        self.last_regime
    }

    /// Observations fed so far (cancellations excluded).
    pub fn observation_count(&self) -> u64 {
        self.observation_count
    }

    /// Current metrics, recomputed if stale. Top-of-book inputs default to
    /// zero, so `order_book_imbalance` and `mid_price` reflect the windows
    /// only.
    pub fn metrics_summary(&mut self) -> MarketMetrics {
        self.compute_metrics(None, None, 0, 0)
    }

    /// Adjusts one classification gate in place; kinds as in
    /// [`EngineConfig::set_threshold`].
    pub fn set_threshold(&mut self, kind: &str, value: f64) -> Result<(), ConfigError> {
        match kind {
            "volatility" => self.volatility_threshold = value,
            "spread" => self.spread_threshold = value,
            "imbalance" => self.imbalance_threshold = value,
            "cancellation" => self.cancellation_threshold = value,
            other => return Err(ConfigError::UnknownThreshold(other.to_string())),
        }
        self.metrics_dirty = true;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
