//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements one side of the limit order book: a heap of prices
// over a map of price levels, with an id→price map giving the O(1) average
// cancellation path. All state lives behind a per-side mutex so a side can be
// shared with the cancellation worker and with sharded callers.
//
// | Component     | Description                                                               |
// |---------------|---------------------------------------------------------------------------|
// | BookSide      | Priority structure over price levels for one side                         |
// | BookFill      | Outcome of executing against the best level                               |
// | Stale prices  | Purged lazily on best-price probes; the non-sharded configuration also    |
// |               | rebuilds the heap when a removal empties a level                          |
//--------------------------------------------------------------------------------------------------

use std::collections::{BinaryHeap, HashMap, HashSet};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::level::{Discipline, PriceLevel};
use crate::types::{Order, Side};

/// Outcome of executing an incoming quantity against the best level of a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookFill {
    /// The resting order that was hit.
    pub order_id: Uuid,
    /// The resting level's price; this is the trade price.
    pub price: Decimal,
    /// Quantity executed.
    pub quantity: u64,
    /// Quantity the resting order still has open.
    pub resting_remaining: u64,
    /// True when the resting order was exhausted and left the book.
    pub removed: bool,
}

struct SideState {
    heap: BinaryHeap<Decimal>,
    levels: HashMap<Decimal, PriceLevel>,
    locations: HashMap<Uuid, Decimal>,
    discipline: Discipline,
}

/// One side of the book. The set of non-empty prices is kept in a heap (max
/// for bids; asks store negated keys so the same max-heap yields the minimum).
///
/// `rebuild_on_remove` selects the stale-entry strategy: the standalone
/// configuration compacts the heap whenever a removal empties a level, the
/// sharded configuration relies purely on lazy purge plus cache invalidation.
pub struct BookSide {
    side: Side,
    rebuild_on_remove: bool,
    state: Mutex<SideState>,
}

impl BookSide {
    /// Creates a side for the standalone book (heap compaction on removal).
    pub fn new(side: Side) -> Self {
        Self::with_strategy(side, true)
    }

    /// Creates a side for use as a shard (lazy cleanup only).
    pub fn for_shard(side: Side) -> Self {
        Self::with_strategy(side, false)
    }

    fn with_strategy(side: Side, rebuild_on_remove: bool) -> Self {
        Self {
            side,
            rebuild_on_remove,
            state: Mutex::new(SideState {
                heap: BinaryHeap::new(),
                levels: HashMap::new(),
                locations: HashMap::new(),
                discipline: Discipline::Fifo,
            }),
        }
    }

    /// Which side of the book this is.
    pub fn side(&self) -> Side {
        self.side
    }

    fn heap_key(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Buy => price,
            Side::Sell => -price,
        }
    }

    fn key_price(&self, key: Decimal) -> Decimal {
        match self.side {
            Side::Buy => key,
            Side::Sell => -key,
        }
    }

    /// Adds a resting order to this side.
    ///
    /// # Arguments
    /// * `order` - The order to rest; its price keys the level
    ///
    /// # Notes
    /// - Total after admission: the caller has already validated the order,
    ///   so this never fails
    /// - The price is pushed onto the heap only when this is the first order
    ///   at that price
    /// - The id→price map is updated for the O(1) cancellation path
    pub fn add_order(&self, order: Order) {
        let mut state = self.state.lock();
        let price = order.price;
        let discipline = state.discipline;
        if !state.levels.contains_key(&price) {
            state.levels.insert(price, PriceLevel::new(price, discipline));
            let key = self.heap_key(price);
            state.heap.push(key);
        }
        state.locations.insert(order.id, price);
        state
            .levels
            .get_mut(&price)
            .expect("level exists after insertion")
            .add(order);
    }

    /// Removes an order by id.
    ///
    /// # Arguments
    /// * `order_id` - The unique identifier of the order to remove
    ///
    /// # Returns
    /// * `true` - The order was found and removed
    /// * `false` - No order with this id rests on this side
    ///
    /// # Notes
    /// - The level's volume aggregate drops by the order's remaining quantity
    /// - An emptied level is dropped from the price map; in the standalone
    ///   configuration the heap is rebuilt, in the shard configuration the
    ///   stale heap entry is left for the next best-price probe
    pub fn remove_order(&self, order_id: Uuid) -> bool {
        let mut state = self.state.lock();
        let Some(price) = state.locations.remove(&order_id) else {
            return false;
        };
        let Some(level) = state.levels.get_mut(&price) else {
            return false;
        };
        if level.remove(order_id).is_none() {
            return false;
        }
        if level.is_empty() {
            state.levels.remove(&price);
            if self.rebuild_on_remove {
                self.rebuild_heap(&mut state);
            }
        }
        true
    }

    fn rebuild_heap(&self, state: &mut SideState) {
        let keys: Vec<Decimal> = state.levels.keys().map(|p| self.heap_key(*p)).collect();
        state.heap = BinaryHeap::from(keys);
    }

    fn best_price_locked(&self, state: &mut SideState) -> Option<Decimal> {
        while let Some(key) = state.heap.peek().copied() {
            let price = self.key_price(key);
            match state.levels.get(&price) {
                Some(level) if !level.is_empty() => return Some(price),
                _ => {
                    state.heap.pop();
                    state.levels.remove(&price);
                }
            }
        }
        None
    }

    /// Best price of the side: the minimum ask or maximum bid.
    ///
    /// # Returns
    /// * `Some(price)` - The best price among non-empty levels
    /// * `None` - The side is empty
    ///
    /// # Notes
    /// Stale heap entries (for prices whose level emptied or disappeared) are
    /// purged here, by repeatedly dropping the heap top until it references a
    /// non-empty level.
    pub fn best_price(&self) -> Option<Decimal> {
        let mut state = self.state.lock();
        self.best_price_locked(&mut state)
    }

    /// Aggregated depth of this side.
    ///
    /// # Arguments
    /// * `n` - Maximum number of price levels to return
    ///
    /// # Returns
    /// The top `n` non-empty `(price, volume)` rows in best-first order;
    /// walks a copy of the heap, so the live heap is untouched.
    pub fn depth(&self, n: usize) -> Vec<(Decimal, u64)> {
        let state = self.state.lock();
        let mut heap = state.heap.clone();
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        while rows.len() < n {
            let Some(key) = heap.pop() else { break };
            let price = self.key_price(key);
            if !seen.insert(price) {
                continue;
            }
            if let Some(level) = state.levels.get(&price) {
                if !level.is_empty() {
                    rows.push((price, level.total_volume()));
                }
            }
        }
        rows
    }

    /// Total resting volume at `price`, if any order rests there.
    pub fn volume_at(&self, price: Decimal) -> Option<u64> {
        let state = self.state.lock();
        state
            .levels
            .get(&price)
            .filter(|level| !level.is_empty())
            .map(|level| level.total_volume())
    }

    /// Cumulative *visible* volume at prices acceptable to an aggressor with
    /// the given limit (`None` means any price). Asks accumulate levels at or
    /// below the limit, bids levels at or above it. Used by FOK admission.
    pub fn visible_volume_within(&self, limit: Option<Decimal>) -> u64 {
        let state = self.state.lock();
        state
            .levels
            .values()
            .filter(|level| !level.is_empty())
            .filter(|level| match (self.side, limit) {
                (_, None) => true,
                (Side::Sell, Some(limit)) => level.price() <= limit,
                (Side::Buy, Some(limit)) => level.price() >= limit,
            })
            .map(|level| level.visible_volume())
            .sum()
    }

    /// Executes up to `max_qty` against the top order of the best level,
    /// provided the best price crosses `limit` (`None` matches any price).
    /// The whole step (crossing check, fill, level cleanup) happens under
    /// one lock acquisition so concurrent cancels cannot interleave.
    pub fn execute_at_best(&self, max_qty: u64, limit: Option<Decimal>) -> Option<BookFill> {
        let mut state = self.state.lock();
        let best = self.best_price_locked(&mut state)?;
        if let Some(limit) = limit {
            let crosses = match self.side {
                Side::Sell => best <= limit,
                Side::Buy => best >= limit,
            };
            if !crosses {
                return None;
            }
        }

        let level = state.levels.get_mut(&best)?;
        let fill = level.fill_top(max_qty)?;
        let emptied = level.is_empty();
        if fill.removed {
            state.locations.remove(&fill.order_id);
        }
        if emptied {
            state.levels.remove(&best);
            if self.rebuild_on_remove {
                self.rebuild_heap(&mut state);
            }
        }
        Some(BookFill {
            order_id: fill.order_id,
            price: best,
            quantity: fill.quantity,
            resting_remaining: fill.resting_remaining,
            removed: fill.removed,
        })
    }

    /// Applies a fill to a specific resting order (used by the sharded
    /// variant, which selects the globally-earliest order itself).
    pub fn fill_order(&self, order_id: Uuid, quantity: u64) -> Option<BookFill> {
        let mut state = self.state.lock();
        let price = state.locations.get(&order_id).copied()?;
        let level = state.levels.get_mut(&price)?;
        let fill = level.fill_order(order_id, quantity)?;
        let emptied = level.is_empty();
        if fill.removed {
            state.locations.remove(&order_id);
        }
        if emptied {
            state.levels.remove(&price);
            if self.rebuild_on_remove {
                self.rebuild_heap(&mut state);
            }
        }
        Some(BookFill {
            order_id,
            price,
            quantity: fill.quantity,
            resting_remaining: fill.resting_remaining,
            removed: fill.removed,
        })
    }

    /// Switches the in-level ordering discipline for every level; the levels
    /// resort lazily on their next access.
    pub fn set_discipline(&self, discipline: Discipline) {
        let mut state = self.state.lock();
        state.discipline = discipline;
        for level in state.levels.values_mut() {
            level.set_discipline(discipline);
        }
    }

    /// Whether an order with this id rests on the side.
    pub fn contains(&self, order_id: Uuid) -> bool {
        self.state.lock().locations.contains_key(&order_id)
    }

    /// Clones the resting order with this id, if present.
    pub fn order(&self, order_id: Uuid) -> Option<Order> {
        let state = self.state.lock();
        let price = state.locations.get(&order_id)?;
        state
            .levels
            .get(price)?
            .orders()
            .find(|o| o.id == order_id)
            .cloned()
    }

    /// Clones all orders resting at `price` in the level's current order.
    pub fn orders_at(&self, price: Decimal) -> Vec<Order> {
        let state = self.state.lock();
        state
            .levels
            .get(&price)
            .map(|level| level.orders().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of resting orders on this side.
    pub fn order_count(&self) -> usize {
        self.state.lock().locations.len()
    }

    /// Number of non-empty price levels on this side.
    pub fn level_count(&self) -> usize {
        let state = self.state.lock();
        state.levels.values().filter(|level| !level.is_empty()).count()
    }

    /// Verifies the structural invariants of the side: per-level volume
    /// aggregates, id-map consistency, and agreement between the heap-derived
    /// best price and the extremum of the non-empty level keys. A failure here
    /// is the fatal class of error; tests assert it never happens.
    pub fn check_invariants(&self) -> bool {
        let state = self.state.lock();
        for level in state.levels.values() {
            if !level.check_volume() {
                return false;
            }
        }
        for (id, price) in &state.locations {
            match state.levels.get(price) {
                Some(level) if level.orders().any(|o| o.id == *id) => {}
                _ => return false,
            }
        }
        let extremum = state
            .levels
            .iter()
            .filter(|(_, level)| !level.is_empty())
            .map(|(price, _)| *price)
            .reduce(|a, b| match self.side {
                Side::Buy => a.max(b),
                Side::Sell => a.min(b),
            });
        // The heap must still contain an entry for the true best price.
        match extremum {
            Some(best) => state.heap.iter().any(|key| self.key_price(*key) == best),
            None => true,
        }
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
