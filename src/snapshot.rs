//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the observer-facing data carriers: aggregated depth
// snapshots, regime statistics and the per-order metrics samples recorded by
// the adaptive engine. All of them serialize for external consumers.
//
// | Name               | Description                                        |
// |--------------------|----------------------------------------------------|
// | DepthLevel         | One (price, volume) row of aggregated depth        |
// | BookSnapshot       | Point-in-time view of both sides plus the spread   |
// | RegimeChange       | One recorded regime transition                     |
// | RegimeStatistics   | Distribution and history of regime transitions     |
// | MetricsSample      | Periodic per-order sample from the adaptive engine |
// | EngineStatistics   | Append-only log counters common to all variants    |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{MarketRegime, Side};

/// One aggregated `(price, volume)` row of book depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// The level's price.
    pub price: Decimal,
    /// Total resting volume at the price.
    pub volume: u64,
}

impl From<(Decimal, u64)> for DepthLevel {
    fn from((price, volume): (Decimal, u64)) -> Self {
        Self { price, volume }
    }
}

/// An immutable point-in-time view of the order book.
///
/// Bids are ordered by price descending, asks ascending, so index 0 of each
/// is the top of book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Bid depth rows, best first.
    pub bids: Vec<DepthLevel>,
    /// Ask depth rows, best first.
    pub asks: Vec<DepthLevel>,
    /// `best_ask − best_bid`, zero when either side is empty.
    pub spread: Decimal,
}

impl BookSnapshot {
    /// Builds a snapshot from raw depth rows.
    pub fn new(bids: Vec<(Decimal, u64)>, asks: Vec<(Decimal, u64)>) -> Self {
        let bids: Vec<DepthLevel> = bids.into_iter().map(DepthLevel::from).collect();
        let asks: Vec<DepthLevel> = asks.into_iter().map(DepthLevel::from).collect();
        let spread = match (bids.first(), asks.first()) {
            (Some(bid), Some(ask)) => ask.price - bid.price,
            _ => Decimal::ZERO,
        };
        Self { timestamp: Utc::now(), bids, asks, spread }
    }

    /// Best bid price, if the bid side is non-empty.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }

    /// Best ask price, if the ask side is non-empty.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level.price)
    }

    /// Midpoint of the best bid and ask, or zero when either is absent.
    pub fn mid_price(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid + ask) / Decimal::TWO,
            _ => Decimal::ZERO,
        }
    }
}

/// One recorded regime transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeChange {
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// The regime being left.
    pub from: MarketRegime,
    /// The regime being entered.
    pub to: MarketRegime,
}

/// Aggregated view of regime behaviour since engine start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeStatistics {
    /// Number of transitions so far.
    pub total_changes: u64,
    /// The regime currently in force.
    pub current_regime: MarketRegime,
    /// Count of transitions into each regime.
    pub regime_distribution: HashMap<MarketRegime, u64>,
    /// Full transition history, oldest first.
    pub regime_history: Vec<RegimeChange>,
    /// Seconds elapsed since the last transition (or since engine start).
    pub time_since_last_change: f64,
}

/// A periodic sample recorded by the adaptive engine while processing orders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// When the sample was recorded.
    pub timestamp: DateTime<Utc>,
    /// The regime in force while the order was processed.
    pub regime: MarketRegime,
    /// Side of the sampled order.
    pub side: Side,
    /// Quantity of the sampled order.
    pub quantity: u64,
    /// Number of trades the order generated.
    pub trades_generated: usize,
    /// Total volume executed by those trades.
    pub volume_executed: u64,
    /// Spread observed after processing.
    pub spread: Decimal,
}

/// Counters over the append-only order and trade logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatistics {
    /// Orders admitted since engine start.
    pub total_orders: u64,
    /// Trades produced since engine start.
    pub total_trades: u64,
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_spread_and_mid() {
        let snapshot = BookSnapshot::new(
            vec![(dec!(99.0), 10), (dec!(98.0), 5)],
            vec![(dec!(101.0), 7)],
        );
        assert_eq!(snapshot.spread, dec!(2.0));
        assert_eq!(snapshot.mid_price(), dec!(100.0));
        assert_eq!(snapshot.best_bid(), Some(dec!(99.0)));
        assert_eq!(snapshot.best_ask(), Some(dec!(101.0)));
    }

    #[test]
    fn test_snapshot_one_sided_book() {
        let snapshot = BookSnapshot::new(vec![(dec!(99.0), 10)], vec![]);
        assert_eq!(snapshot.spread, Decimal::ZERO);
        assert_eq!(snapshot.mid_price(), Decimal::ZERO);
        assert_eq!(snapshot.best_ask(), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = BookSnapshot::new(vec![(dec!(99.0), 10)], vec![(dec!(100.0), 4)]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"bids\""));
        assert!(json.contains("\"spread\""));
    }
}
