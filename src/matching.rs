//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the matching kernel shared by every engine variant:
// cross an incoming order against the opposite side in price-time priority,
// emitting one trade per fill at the resting order's price.
//
// | Function            | Description                                                         |
// |---------------------|---------------------------------------------------------------------|
// | price_limit         | The crossing bound an incoming order imposes (None for market)      |
// | match_against       | Drive the fill loop against the opposite BookSide                   |
// | fok_executable      | Fill-or-kill admission: enough visible depth at acceptable prices   |
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;

use crate::book::BookSide;
use crate::types::{Order, OrderKind, Side, Trade};

/// The price bound an incoming order imposes on the opposite side, or `None`
/// when the order matches at any price (market kinds).
pub fn price_limit(order: &Order) -> Option<Decimal> {
    match order.kind {
        OrderKind::Market | OrderKind::StopLossMarket => None,
        _ => Some(order.price),
    }
}

/// Crosses `incoming` against `opposite`, producing trades in best-price then
/// in-level priority order. Advances the incoming order's filled quantity;
/// resting orders are updated (and removed when exhausted) inside the book.
///
/// The caller decides what to do with any residual: rest it, discard it, or
/// reject beforehand (FOK).
pub fn match_against(incoming: &mut Order, opposite: &BookSide) -> Vec<Trade> {
    let limit = price_limit(incoming);
    let mut trades = Vec::new();

    while incoming.remaining() > 0 {
        let Some(fill) = opposite.execute_at_best(incoming.remaining(), limit) else {
            break;
        };

        incoming.filled += fill.quantity;
        if incoming.kind != OrderKind::Iceberg {
            incoming.displayed = incoming.remaining();
        }

        // The trade price is the resting order's price.
        let trade = match incoming.side {
            Side::Buy => Trade::fill(incoming.id, fill.order_id, fill.price, fill.quantity),
            Side::Sell => Trade::fill(fill.order_id, incoming.id, fill.price, fill.quantity),
        };
        trades.push(trade);
    }

    trades
}

/// Fill-or-kill admission check: true when the cumulative visible volume at
/// prices acceptable to `incoming` covers its full quantity. Performed before
/// touching the book so a rejection has no side effects.
pub fn fok_executable(incoming: &Order, opposite: &BookSide) -> bool {
    let available = opposite.visible_volume_within(price_limit(incoming));
    fok_executable_volume(incoming, available)
}

/// FOK admission given a pre-computed available volume (the sharded side sums
/// its shards before calling this).
pub fn fok_executable_volume(incoming: &Order, available: u64) -> bool {
    available >= incoming.quantity
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
