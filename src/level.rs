//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements a single price level: the ordered collection of all
// resting orders at one exact price on one side of the book, together with the
// regime-driven ordering discipline applied inside the level.
//
// | Component     | Description                                                               |
// |---------------|---------------------------------------------------------------------------|
// | Discipline    | In-level ordering rule: Fifo, SizeTime or Hybrid                          |
// | PriceLevel    | Owned queue of orders at one price with a running volume aggregate        |
// | LevelFill     | Outcome of filling the top order of a level                               |
//
// Reordering after a discipline change is lazy: the level carries a
// `needs_resort` flag that is honoured on the next `top()` or `add()`.
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::types::{Order, OrderKind};

/// In-level ordering discipline, rebound by the adaptive engine on regime
/// transitions. Modelled as a plain sum type rather than a trait hierarchy so
/// levels can switch discipline without reallocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Strict time priority: first in, first out.
    Fifo,
    /// Largest remaining quantity first, submission time as tie-break.
    SizeTime,
    /// Weighted blend of size and age: `0.7 * remaining + 0.3 * timestamp`,
    /// larger weight first, submission time as tie-break.
    Hybrid,
}

impl Discipline {
    /// Sort key for an order under this discipline. Ascending order of the
    /// key yields the matching order of the level.
    fn sort_key(&self, order: &Order) -> (Decimal, i64, u64) {
        let ts = order.timestamp_ms();
        match self {
            // FIFO sorts purely by admission time when a resort is forced.
            Discipline::Fifo => (Decimal::ZERO, ts, order.sequence),
            Discipline::SizeTime => (-Decimal::from(order.remaining()), ts, order.sequence),
            Discipline::Hybrid => {
                let weighted =
                    dec!(0.7) * Decimal::from(order.remaining()) + dec!(0.3) * Decimal::from(ts);
                (-weighted, ts, order.sequence)
            }
        }
    }

    /// Whether insertions must keep the level sorted by `sort_key` (as opposed
    /// to appending in arrival order).
    fn keeps_sorted(&self) -> bool {
        !matches!(self, Discipline::Fifo)
    }
}

/// Outcome of filling the top order of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelFill {
    /// The resting order that was hit.
    pub order_id: Uuid,
    /// Quantity executed by this fill.
    pub quantity: u64,
    /// Quantity the resting order still has open after the fill.
    pub resting_remaining: u64,
    /// True when the resting order was exhausted and removed from the level.
    pub removed: bool,
}

/// All resting orders at one exact price on one side of the book.
///
/// The level uniquely owns its orders; the book side keeps a non-owning
/// id→price map for the O(1) cancellation path.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    price: Decimal,
    orders: Vec<Order>,
    total_volume: u64,
    discipline: Discipline,
    needs_resort: bool,
}

impl PriceLevel {
    /// Creates an empty level at `price` with the given discipline.
    pub fn new(price: Decimal, discipline: Discipline) -> Self {
        Self {
            price,
            orders: Vec::new(),
            total_volume: 0,
            discipline,
            needs_resort: false,
        }
    }

    /// The price of this level.
    pub fn price(&self) -> Decimal {
        self.price
    }

    /// Total resting volume: the sum of `remaining()` over all orders.
    pub fn total_volume(&self) -> u64 {
        self.total_volume
    }

    /// Sum of the visible quantities of all orders (icebergs expose only
    /// their current tranche). Used by fill-or-kill admission.
    pub fn visible_volume(&self) -> u64 {
        self.orders.iter().map(Order::visible).sum()
    }

    /// Number of orders resting at this level.
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Returns true if this price level has no orders.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Iterates the resting orders in their current matching order. Callers
    /// that need the discipline applied should go through `top()` first.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    /// Switches the ordering discipline. The actual reorder is deferred to
    /// the next `top()` or `add()` so a regime transition stays cheap.
    pub fn set_discipline(&mut self, discipline: Discipline) {
        if self.discipline != discipline {
            self.discipline = discipline;
            self.needs_resort = true;
        }
    }

    fn resort(&mut self) {
        let discipline = self.discipline;
        self.orders.sort_by_key(|o| discipline.sort_key(o));
        self.needs_resort = false;
    }

    /// Adds an order to the level. FIFO levels append; size-prioritising
    /// disciplines use binary insertion so a resort is not needed per add.
    pub fn add(&mut self, order: Order) {
        if self.needs_resort {
            self.resort();
        }
        self.total_volume += order.remaining();
        if self.discipline.keeps_sorted() {
            let key = self.discipline.sort_key(&order);
            let idx = self
                .orders
                .partition_point(|o| self.discipline.sort_key(o) <= key);
            self.orders.insert(idx, order);
        } else {
            self.orders.push(order);
        }
    }

    /// Removes an order by identity. Decrements the volume aggregate by the
    /// order's *remaining* quantity, not its filled quantity.
    pub fn remove(&mut self, order_id: Uuid) -> Option<Order> {
        let idx = self.orders.iter().position(|o| o.id == order_id)?;
        let order = self.orders.remove(idx);
        self.total_volume -= order.remaining();
        Some(order)
    }

    /// The next order to match at this level, honouring the discipline.
    /// Never returns an order with zero remaining quantity.
    pub fn top(&mut self) -> Option<&Order> {
        if self.needs_resort {
            self.resort();
        }
        while let Some(front) = self.orders.first() {
            if front.remaining() > 0 {
                return self.orders.first();
            }
            // An exhausted order should have been removed by the caller at
            // fill time; drop it rather than hand it out.
            self.orders.remove(0);
        }
        None
    }

    /// Fills the top order with up to `max_qty` units, bounded by the order's
    /// visible quantity.
    pub fn fill_top(&mut self, max_qty: u64) -> Option<LevelFill> {
        if self.needs_resort {
            self.resort();
        }
        let front_id = self.orders.first()?.id;
        self.fill_order(front_id, max_qty)
    }

    /// Fills a specific resting order with up to `max_qty` units, bounded by
    /// its visible quantity. Maintains the volume aggregate, consumes iceberg
    /// tranches and re-queues an iceberg whose tranche is exhausted at the
    /// back of the level with a refreshed tranche. Partially filled non-iceberg
    /// orders keep their queue position.
    pub fn fill_order(&mut self, order_id: Uuid, max_qty: u64) -> Option<LevelFill> {
        let idx = self.orders.iter().position(|o| o.id == order_id)?;
        let order = &mut self.orders[idx];
        let quantity = max_qty.min(order.visible());
        if quantity == 0 {
            return None;
        }

        order.filled += quantity;
        self.total_volume -= quantity;
        let resting_remaining = order.remaining();

        if resting_remaining == 0 {
            self.orders.remove(idx);
            return Some(LevelFill { order_id, quantity, resting_remaining: 0, removed: true });
        }

        if order.kind == OrderKind::Iceberg {
            order.displayed = order.displayed.saturating_sub(quantity);
            if order.displayed == 0 {
                // Tranche exhausted: refresh from remaining and re-queue at
                // the end of the level, surrendering time priority.
                let mut order = self.orders.remove(idx);
                order.displayed = order.disclosed.unwrap_or(0).min(order.remaining());
                self.orders.push(order);
            }
        } else {
            order.displayed = resting_remaining;
        }

        Some(LevelFill { order_id, quantity, resting_remaining, removed: false })
    }

    /// Recomputes the volume aggregate from scratch and compares it to the
    /// running total. Test support for detecting aggregate drift.
    pub fn check_volume(&self) -> bool {
        self.total_volume == self.orders.iter().map(Order::remaining).sum::<u64>()
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn order_with_seq(qty: u64, seq: u64) -> Order {
        let mut order = Order::limit(Side::Buy, dec!(100.0), qty).unwrap();
        order.sequence = seq;
        order.timestamp = chrono::DateTime::from_timestamp_millis(1_700_000_000_000 + seq as i64)
            .unwrap();
        order
    }

    #[test]
    fn test_fifo_append_order() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::Fifo);
        level.add(order_with_seq(10, 1));
        level.add(order_with_seq(50, 2));
        level.add(order_with_seq(5, 3));

        assert_eq!(level.total_volume(), 65);
        assert_eq!(level.top().unwrap().sequence, 1);
    }

    #[test]
    fn test_size_time_insertion() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::SizeTime);
        level.add(order_with_seq(10, 1));
        level.add(order_with_seq(50, 2));
        level.add(order_with_seq(50, 3));
        level.add(order_with_seq(5, 4));

        // Largest first; equal sizes keep time order.
        let seqs: Vec<u64> = level.orders().map(|o| o.sequence).collect();
        assert_eq!(seqs, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_lazy_resort_on_top() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::Fifo);
        level.add(order_with_seq(10, 1));
        level.add(order_with_seq(50, 2));

        level.set_discipline(Discipline::SizeTime);
        // Resort happens on the next access, not eagerly.
        assert_eq!(level.top().unwrap().sequence, 2);
    }

    #[test]
    fn test_resort_back_to_time_order() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::SizeTime);
        level.add(order_with_seq(10, 1));
        level.add(order_with_seq(50, 2));
        assert_eq!(level.top().unwrap().sequence, 2);

        level.set_discipline(Discipline::Fifo);
        assert_eq!(level.top().unwrap().sequence, 1);
    }

    #[test]
    fn test_remove_decrements_by_remaining() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::Fifo);
        let mut order = order_with_seq(100, 1);
        order.filled = 40;
        let id = order.id;
        level.add(order);
        assert_eq!(level.total_volume(), 60);

        let removed = level.remove(id).unwrap();
        assert_eq!(removed.remaining(), 60);
        assert_eq!(level.total_volume(), 0);
        assert!(level.is_empty());
    }

    #[test]
    fn test_fill_top_partial_and_exhaust() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::Fifo);
        level.add(order_with_seq(100, 1));

        let fill = level.fill_top(30).unwrap();
        assert_eq!(fill.quantity, 30);
        assert_eq!(fill.resting_remaining, 70);
        assert!(!fill.removed);
        assert_eq!(level.total_volume(), 70);

        let fill = level.fill_top(200).unwrap();
        assert_eq!(fill.quantity, 70);
        assert!(fill.removed);
        assert!(level.is_empty());
        assert!(level.check_volume());
    }

    #[test]
    fn test_iceberg_tranche_requeue() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::Fifo);
        let mut iceberg = Order::iceberg(Side::Sell, dec!(100.0), 100, 30).unwrap();
        iceberg.sequence = 1;
        let iceberg_id = iceberg.id;
        level.add(iceberg);
        let mut other = Order::limit(Side::Sell, dec!(100.0), 40).unwrap();
        other.sequence = 2;
        let other_id = other.id;
        level.add(other);

        // A single fill may consume at most the visible tranche.
        let fill = level.fill_top(100).unwrap();
        assert_eq!(fill.order_id, iceberg_id);
        assert_eq!(fill.quantity, 30);
        assert!(!fill.removed);

        // Tranche exhausted: the iceberg moved behind the other order with a
        // refreshed tranche.
        assert_eq!(level.top().unwrap().id, other_id);
        let ids: Vec<Uuid> = level.orders().map(|o| o.id).collect();
        assert_eq!(ids, vec![other_id, iceberg_id]);
        let requeued = level.orders().find(|o| o.id == iceberg_id).unwrap();
        assert_eq!(requeued.visible(), 30);
        assert_eq!(requeued.remaining(), 70);
        assert!(level.check_volume());
    }

    #[test]
    fn test_fill_respects_visible_not_remaining() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::Fifo);
        let iceberg = Order::iceberg(Side::Sell, dec!(100.0), 100, 25).unwrap();
        level.add(iceberg);

        let fill = level.fill_top(80).unwrap();
        assert_eq!(fill.quantity, 25);
        assert_eq!(fill.resting_remaining, 75);
    }

    #[test]
    fn test_hybrid_discipline_prefers_weighted_size() {
        let mut level = PriceLevel::new(dec!(100.0), Discipline::Hybrid);
        // Same timestamp: ordering collapses to size.
        let small = order_with_seq(10, 1);
        let mut large = order_with_seq(500, 2);
        large.timestamp = small.timestamp;
        level.add(small);
        level.add(large);
        assert_eq!(level.top().unwrap().sequence, 2);
    }
}
