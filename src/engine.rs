//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the base (non-adaptive) matching engine: two book
// sides driven through the matching kernel, with append-only order and trade
// logs. The adaptive engine layers regime handling on top of this; the
// exchange engine replaces the admission path entirely.
//
// | Name           | Description                                       | Key Methods        |
// |----------------|---------------------------------------------------|--------------------|
// | MatchEngine    | Price-time priority engine over two BookSides     | process            |
// |                |                                                   | cancel             |
// |                |                                                   | snapshot           |
// |                |                                                   | statistics         |
//--------------------------------------------------------------------------------------------------

use tracing::debug;
use uuid::Uuid;

use crate::book::BookSide;
use crate::matching::{fok_executable, match_against};
use crate::snapshot::{BookSnapshot, EngineStatistics};
use crate::types::{Order, OrderKind, Side, Trade};

/// Base matching engine with strict price-time priority.
pub struct MatchEngine {
    bids: BookSide,
    asks: BookSide,
    order_log: Vec<Order>,
    trade_log: Vec<Trade>,
    next_sequence: u64,
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            order_log: Vec::new(),
            trade_log: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Admits an order: matches it against the opposite side and rests any
    /// residual according to its kind.
    ///
    /// # Arguments
    /// * `order` - The order to process; the engine assigns its admission
    ///   sequence number
    ///
    /// # Returns
    /// The trades generated by the order, possibly empty. Rejections (FOK
    /// shortfall, expired validity) are a normal outcome, not an error.
    ///
    /// # Notes
    /// - LIMIT and ICEBERG residuals rest on the book
    /// - MARKET and IOC residuals are discarded
    /// - Trades are appended to the engine's trade log in execution order
    pub fn process(&mut self, mut order: Order) -> Vec<Trade> {
        order.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.order_log.push(order.clone());

        if order.is_expired(chrono::Utc::now()) {
            debug!(order_id = %order.id, "order dropped: expired");
            return Vec::new();
        }

        if order.kind == OrderKind::Fok && !fok_executable(&order, self.opposite(order.side)) {
            debug!(order_id = %order.id, "FOK order rejected: insufficient visible depth");
            return Vec::new();
        }

        let opposite = self.opposite(order.side);
        let trades = match_against(&mut order, opposite);

        if order.remaining() > 0 && rests_on_book(order.kind) {
            self.side(order.side).add_order(order);
        }

        self.trade_log.extend(trades.iter().cloned());
        trades
    }

    /// Cancels a resting order.
    ///
    /// # Arguments
    /// * `order_id` - The unique identifier of the order to cancel
    ///
    /// # Returns
    /// * `true` - The order was removed from one of the sides
    /// * `false` - The id is unknown (already filled, cancelled, or never
    ///   rested); a repeated cancel of the same id also returns false
    pub fn cancel(&mut self, order_id: Uuid) -> bool {
        let cancelled = self.bids.remove_order(order_id) || self.asks.remove_order(order_id);
        if cancelled {
            debug!(%order_id, "order cancelled");
        }
        cancelled
    }

    fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn opposite(&self, side: Side) -> &BookSide {
        self.side(side.opposite())
    }

    /// The bid side of the book.
    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    /// The ask side of the book.
    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// Best bid price, if any.
    pub fn best_bid(&self) -> Option<rust_decimal::Decimal> {
        self.bids.best_price()
    }

    /// Best ask price, if any.
    pub fn best_ask(&self) -> Option<rust_decimal::Decimal> {
        self.asks.best_price()
    }

    /// Aggregated depth snapshot of the top `levels` prices per side.
    pub fn snapshot(&self, levels: usize) -> BookSnapshot {
        BookSnapshot::new(self.bids.depth(levels), self.asks.depth(levels))
    }

    /// Counters over the append-only logs.
    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            total_orders: self.order_log.len() as u64,
            total_trades: self.trade_log.len() as u64,
        }
    }

    /// All orders admitted so far, in admission order.
    pub fn order_log(&self) -> &[Order] {
        &self.order_log
    }

    /// All trades produced so far, in execution order.
    pub fn trade_log(&self) -> &[Trade] {
        &self.trade_log
    }
}

/// Whether a residual of this kind rests on the book after matching. Market
/// and IOC residuals are discarded; FOK either fills fully or never trades;
/// stop kinds rest in the exchange engine's pending map, not on the book.
fn rests_on_book(kind: OrderKind) -> bool {
    matches!(kind, OrderKind::Limit | OrderKind::Iceberg)
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
