//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the core data types shared by every engine variant:
// orders, trades, and the discrete enums describing sides, kinds, validity,
// trading phases and market regimes.
//
// | Section            | Description                                                      |
// |--------------------|------------------------------------------------------------------|
// | ENUMS              | Side, OrderKind, Validity, TradingPhase, MarketRegime            |
// | STRUCTS            | Order (validated on construction) and Trade                      |
// | ERRORS             | OrderError: construction-time validation failures                |
// | TESTS              | Unit tests for validation and derived quantities                 |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

//--------------------------------------------------------------------------------------------------
//  ENUMS
//--------------------------------------------------------------------------------------------------

/// Represents the side of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// A buy order.
    Buy,
    /// A sell order.
    Sell,
}

impl Side {
    /// Returns the opposite side (the side an incoming order matches against).
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Represents the kind of an order, influencing its matching behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Executes at the limit price or better; the residual rests on the book.
    Limit,
    /// Executes immediately at the best available price; never rests.
    Market,
    /// Immediate-or-cancel: like a limit order, but the residual is discarded.
    Ioc,
    /// Stop-loss limit: converts to a limit order when the trigger is crossed.
    StopLoss,
    /// Stop-loss market: converts to a market order when the trigger is crossed.
    StopLossMarket,
    /// Fill-or-kill: executes fully and immediately, or not at all.
    Fok,
    /// Discloses only a slice of its total quantity at any time.
    Iceberg,
}

/// Defines how long an order remains eligible for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Validity {
    /// Valid for the trading day.
    Day,
    /// Immediate-or-cancel.
    Ioc,
    /// Good-till-cancelled.
    Gtc,
    /// Good-till-date; requires an expiry timestamp.
    Gtd,
}

impl Default for Validity {
    fn default() -> Self {
        Self::Day
    }
}

/// Trading phases for the exchange-style engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingPhase {
    /// Pre-open call auction; orders are buffered.
    PreOpen,
    /// Opening auction match.
    Opening,
    /// Normal continuous trading.
    Continuous,
    /// Closing call auction; orders are buffered.
    Closing,
    /// After market close.
    PostClose,
    /// Trading halted by the circuit breaker.
    Halted,
}

/// Coarse classification of current market conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    Normal,
    HighVolatility,
    Illiquid,
    Directional,
    HighFrequency,
}

//--------------------------------------------------------------------------------------------------
//  ERRORS
//--------------------------------------------------------------------------------------------------

/// Validation failures raised on `Order` construction. These never reach the
/// engines: an order that fails construction is rejected before admission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// The order quantity must be a positive integer.
    #[error("order quantity must be positive")]
    NonPositiveQuantity,
    /// Limit-priced kinds (limit, IOC, FOK, stop-loss limit, iceberg) need a positive price.
    #[error("{kind:?} order price must be positive")]
    NonPositivePrice { kind: OrderKind },
    /// Stop kinds need a positive trigger price.
    #[error("stop-loss orders require a positive stop price")]
    MissingStopPrice,
    /// Iceberg orders need a positive disclosed quantity.
    #[error("iceberg orders require a positive disclosed quantity")]
    MissingDisclosedQuantity,
    /// The disclosed slice cannot exceed the total quantity.
    #[error("disclosed quantity {disclosed} exceeds total quantity {total}")]
    DisclosedExceedsTotal { disclosed: u64, total: u64 },
}

//--------------------------------------------------------------------------------------------------
//  STRUCTS
//--------------------------------------------------------------------------------------------------

/// A trading order. Prices use `Decimal`; quantities are integral units.
///
/// Orders are built through the validating constructors (`Order::limit`,
/// `Order::market`, ...), which enforce the per-kind invariants; the engines
/// assume those invariants hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier for the order.
    pub id: Uuid,
    /// Side of the order (buy or sell).
    pub side: Side,
    /// Kind of the order (limit, market, ...).
    pub kind: OrderKind,
    /// Limit price. `Decimal::ZERO` for market orders, which never carry a price.
    pub price: Decimal,
    /// Total quantity.
    pub quantity: u64,
    /// Quantity filled so far; monotonically non-decreasing, never exceeds `quantity`.
    pub filled: u64,
    /// Submission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Admission counter assigned by the engine; tie-break for time priority.
    pub sequence: u64,
    /// Trigger price for stop-loss kinds.
    pub stop_price: Option<Decimal>,
    /// Disclosed slice for iceberg orders.
    pub disclosed: Option<u64>,
    /// Time-in-force policy.
    pub validity: Validity,
    /// Expiry timestamp for GTD orders.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether a stop-loss order has been activated.
    pub triggered: bool,
    /// The currently displayed tranche. Equals `remaining()` for non-iceberg
    /// kinds; for icebergs it is consumed per fill and refreshed from the
    /// remaining quantity when exhausted.
    pub displayed: u64,
}

impl Order {
    fn build(
        side: Side,
        kind: OrderKind,
        price: Decimal,
        quantity: u64,
        stop_price: Option<Decimal>,
        disclosed: Option<u64>,
    ) -> Result<Self, OrderError> {
        if quantity == 0 {
            return Err(OrderError::NonPositiveQuantity);
        }
        match kind {
            OrderKind::Limit | OrderKind::Ioc | OrderKind::Fok | OrderKind::StopLoss
            | OrderKind::Iceberg => {
                if price <= Decimal::ZERO {
                    return Err(OrderError::NonPositivePrice { kind });
                }
            }
            OrderKind::Market | OrderKind::StopLossMarket => {}
        }
        if matches!(kind, OrderKind::StopLoss | OrderKind::StopLossMarket) {
            match stop_price {
                Some(stop) if stop > Decimal::ZERO => {}
                _ => return Err(OrderError::MissingStopPrice),
            }
        }
        if kind == OrderKind::Iceberg {
            match disclosed {
                None | Some(0) => return Err(OrderError::MissingDisclosedQuantity),
                Some(d) if d > quantity => {
                    return Err(OrderError::DisclosedExceedsTotal {
                        disclosed: d,
                        total: quantity,
                    });
                }
                Some(_) => {}
            }
        }

        let displayed = match (kind, disclosed) {
            (OrderKind::Iceberg, Some(d)) => d.min(quantity),
            _ => quantity,
        };

        Ok(Self {
            id: Uuid::new_v4(),
            side,
            kind,
            price,
            quantity,
            filled: 0,
            timestamp: Utc::now(),
            sequence: 0,
            stop_price,
            disclosed,
            validity: Validity::default(),
            expires_at: None,
            triggered: false,
            displayed,
        })
    }

    /// Creates a limit order.
    pub fn limit(side: Side, price: Decimal, quantity: u64) -> Result<Self, OrderError> {
        Self::build(side, OrderKind::Limit, price, quantity, None, None)
    }

    /// Creates a market order. Market orders carry no price of their own.
    pub fn market(side: Side, quantity: u64) -> Result<Self, OrderError> {
        Self::build(side, OrderKind::Market, Decimal::ZERO, quantity, None, None)
    }

    /// Creates an immediate-or-cancel order.
    pub fn ioc(side: Side, price: Decimal, quantity: u64) -> Result<Self, OrderError> {
        let mut order = Self::build(side, OrderKind::Ioc, price, quantity, None, None)?;
        order.validity = Validity::Ioc;
        Ok(order)
    }

    /// Creates a fill-or-kill order.
    pub fn fok(side: Side, price: Decimal, quantity: u64) -> Result<Self, OrderError> {
        Self::build(side, OrderKind::Fok, price, quantity, None, None)
    }

    /// Creates a stop-loss limit order.
    pub fn stop_loss(
        side: Side,
        price: Decimal,
        stop_price: Decimal,
        quantity: u64,
    ) -> Result<Self, OrderError> {
        Self::build(side, OrderKind::StopLoss, price, quantity, Some(stop_price), None)
    }

    /// Creates a stop-loss market order.
    pub fn stop_loss_market(
        side: Side,
        stop_price: Decimal,
        quantity: u64,
    ) -> Result<Self, OrderError> {
        Self::build(
            side,
            OrderKind::StopLossMarket,
            Decimal::ZERO,
            quantity,
            Some(stop_price),
            None,
        )
    }

    /// Creates an iceberg order disclosing `disclosed` units at a time.
    pub fn iceberg(
        side: Side,
        price: Decimal,
        quantity: u64,
        disclosed: u64,
    ) -> Result<Self, OrderError> {
        Self::build(side, OrderKind::Iceberg, price, quantity, None, Some(disclosed))
    }

    /// Sets the time-in-force policy.
    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    /// Sets a GTD expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.validity = Validity::Gtd;
        self.expires_at = Some(expires_at);
        self
    }

    /// Quantity still open for matching.
    pub fn remaining(&self) -> u64 {
        self.quantity - self.filled
    }

    /// Quantity visible to the opposite side. Icebergs expose at most their
    /// current tranche; every other kind exposes the full remaining quantity.
    pub fn visible(&self) -> u64 {
        if self.kind == OrderKind::Iceberg {
            self.displayed.min(self.remaining())
        } else {
            self.remaining()
        }
    }

    /// Whether the order has expired at `now`. Only GTD validity expires;
    /// DAY/GTC orders are treated as live for the lifetime of the engine.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.validity, self.expires_at) {
            (Validity::Gtd, Some(expiry)) => now > expiry,
            _ => false,
        }
    }

    /// Whether this is one of the stop-loss kinds.
    pub fn is_stop(&self) -> bool {
        matches!(self.kind, OrderKind::StopLoss | OrderKind::StopLossMarket)
    }

    /// Submission timestamp in epoch milliseconds; used by the weighted
    /// ordering disciplines.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// An atomic fill between one buy and one sell order.
///
/// The trade price is always the resting (book-side) order's price; market
/// orders never contribute a price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique identifier for the trade.
    pub id: Uuid,
    /// Identifier of the buy order.
    pub buy_order_id: Uuid,
    /// Identifier of the sell order.
    pub sell_order_id: Uuid,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity; always positive.
    pub quantity: u64,
    /// Timestamp when the trade occurred.
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Creates a trade record for a fill at `price`.
    pub fn fill(buy_order_id: Uuid, sell_order_id: Uuid, price: Decimal, quantity: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            buy_order_id,
            sell_order_id,
            price,
            quantity,
            timestamp: Utc::now(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
