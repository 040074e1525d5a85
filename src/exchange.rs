//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the exchange-style matching engine. It shares the
// book and matching kernel with the other variants but layers exchange
// admission and lifecycle policies on top: trading phases with call auctions,
// tick-size rounding, price-band admission, stop-loss activation, circuit
// breaker halts, and an optional background cancellation worker.
//
// | Name                | Description                                    | Key Methods           |
// |---------------------|------------------------------------------------|-----------------------|
// | ExchangeEngine      | Phase-aware engine with auction support        | process               |
// |                     |                                                | execute_call_auction  |
// |                     |                                                | cancel / shutdown     |
// | ExchangeStatistics  | Counters plus reference/last/opening prices    |                       |
//
// Phase machine:
//   PRE_OPEN --(execute_call_auction)--> CONTINUOUS
//   CONTINUOUS --(circuit breaker)--> HALTED --(resume_trading)--> CONTINUOUS
//   CONTINUOUS --(set_trading_phase)--> CLOSING --(execute_call_auction)--> POST_CLOSE
//--------------------------------------------------------------------------------------------------

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::book::BookSide;
use crate::config::ExchangeConfig;
use crate::matching::{fok_executable, price_limit};
use crate::snapshot::BookSnapshot;
use crate::types::{Order, OrderKind, Side, TradingPhase, Trade};

/// Capacity of the asynchronous cancellation queue.
const CANCEL_QUEUE_CAPACITY: usize = 1024;

/// Poll timeout of the cancellation worker; bounds how long a shutdown waits.
const CANCEL_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Engine statistics for external observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeStatistics {
    /// Orders admitted (including dropped and rejected ones).
    pub total_orders: u64,
    /// Trades produced, auctions included.
    pub total_trades: u64,
    /// Times the circuit breaker halted trading.
    pub circuit_breaker_hits: u64,
    /// Stop orders waiting for their trigger.
    pub pending_stop_orders: usize,
    /// Current trading phase.
    pub trading_phase: TradingPhase,
    /// Whether trading is halted.
    pub is_halted: bool,
    /// Price of the most recent trade.
    pub last_traded_price: Option<Decimal>,
    /// Reference (previous close) price.
    pub reference_price: Option<Decimal>,
    /// Price discovered by the first call auction.
    pub opening_price: Option<Decimal>,
}

/// Exchange-style matching engine with call auctions, price bands, stop-loss
/// activation and a circuit breaker.
pub struct ExchangeEngine {
    config: ExchangeConfig,
    bids: Arc<BookSide>,
    asks: Arc<BookSide>,
    phase: TradingPhase,

    reference_price: Option<Decimal>,
    last_traded_price: Option<Decimal>,
    opening_price: Option<Decimal>,
    upper_band: Option<Decimal>,
    lower_band: Option<Decimal>,

    auction_buffer: Vec<Order>,
    pending_stops: Arc<Mutex<HashMap<Uuid, Order>>>,

    order_log: Vec<Order>,
    trade_log: Vec<Trade>,
    next_sequence: u64,
    circuit_breaker_hits: u64,

    cancel_tx: Option<Sender<Uuid>>,
    cancel_worker: Option<JoinHandle<()>>,
    worker_running: Arc<AtomicBool>,
}

impl Default for ExchangeEngine {
    fn default() -> Self {
        Self::new(ExchangeConfig::default())
    }
}

impl ExchangeEngine {
    /// Creates an exchange engine; spawns the cancellation worker when
    /// `config.async_cancel` is set.
    pub fn new(config: ExchangeConfig) -> Self {
        let mut engine = Self {
            bids: Arc::new(BookSide::new(Side::Buy)),
            asks: Arc::new(BookSide::new(Side::Sell)),
            phase: TradingPhase::Continuous,
            reference_price: None,
            last_traded_price: None,
            opening_price: None,
            upper_band: None,
            lower_band: None,
            auction_buffer: Vec::new(),
            pending_stops: Arc::new(Mutex::new(HashMap::new())),
            order_log: Vec::new(),
            trade_log: Vec::new(),
            next_sequence: 1,
            circuit_breaker_hits: 0,
            cancel_tx: None,
            cancel_worker: None,
            worker_running: Arc::new(AtomicBool::new(false)),
            config,
        };
        if engine.config.async_cancel {
            engine.start_cancel_worker();
        }
        engine
    }

    fn start_cancel_worker(&mut self) {
        let (tx, rx): (Sender<Uuid>, Receiver<Uuid>) = bounded(CANCEL_QUEUE_CAPACITY);
        let bids = Arc::clone(&self.bids);
        let asks = Arc::clone(&self.asks);
        let stops = Arc::clone(&self.pending_stops);
        let running = Arc::clone(&self.worker_running);
        running.store(true, Ordering::SeqCst);

        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match rx.recv_timeout(CANCEL_POLL_TIMEOUT) {
                    Ok(order_id) => {
                        let cancelled = bids.remove_order(order_id)
                            || asks.remove_order(order_id)
                            || stops.lock().remove(&order_id).is_some();
                        debug!(%order_id, cancelled, "async cancel processed");
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        self.cancel_tx = Some(tx);
        self.cancel_worker = Some(handle);
    }

    //----------------------------------------------------------------------------------------------
    // Reference price, bands, tick size
    //----------------------------------------------------------------------------------------------

    /// Sets the reference price (previous close) and recomputes both bands.
    pub fn set_reference_price(&mut self, price: Decimal) {
        self.reference_price = Some(price);
        self.update_price_bands();
    }

    fn update_price_bands(&mut self) {
        if let Some(reference) = self.reference_price {
            self.upper_band = Some(reference * (Decimal::ONE + self.config.price_band_pct));
            self.lower_band = Some(reference * (Decimal::ONE - self.config.price_band_pct));
        }
    }

    /// Rounds a price to the nearest tick-size multiple. Idempotent.
    pub fn round_to_tick(&self, price: Decimal) -> Decimal {
        if self.config.tick_size > Decimal::ZERO {
            (price / self.config.tick_size).round() * self.config.tick_size
        } else {
            price
        }
    }

    fn within_band(&self, price: Decimal) -> bool {
        match (self.lower_band, self.upper_band) {
            (Some(lower), Some(upper)) => lower <= price && price <= upper,
            _ => true,
        }
    }

    fn check_circuit_breaker(&mut self, trade_price: Decimal) -> bool {
        let Some(reference) = self.reference_price else {
            return false;
        };
        let move_pct = ((trade_price - reference) / reference).abs();
        if move_pct >= self.config.circuit_breaker_pct {
            self.phase = TradingPhase::Halted;
            self.circuit_breaker_hits += 1;
            warn!(%trade_price, %reference, "circuit breaker hit: trading halted");
            return true;
        }
        false
    }

    //----------------------------------------------------------------------------------------------
    // Phases
    //----------------------------------------------------------------------------------------------

    /// Changes the trading phase. Entering an auction phase flushes the
    /// auction buffer.
    pub fn set_trading_phase(&mut self, phase: TradingPhase) {
        self.phase = phase;
        if matches!(phase, TradingPhase::PreOpen | TradingPhase::Closing) {
            self.auction_buffer.clear();
        }
    }

    /// Resumes continuous trading after a halt (manual intervention).
    pub fn resume_trading(&mut self) {
        self.phase = TradingPhase::Continuous;
        info!("trading resumed");
    }

    /// The current trading phase.
    pub fn phase(&self) -> TradingPhase {
        self.phase
    }

    /// Whether trading is currently halted.
    pub fn is_halted(&self) -> bool {
        self.phase == TradingPhase::Halted
    }

    //----------------------------------------------------------------------------------------------
    // Admission and continuous matching
    //----------------------------------------------------------------------------------------------

    /// Admits an order. During auction phases the order is buffered; in
    /// continuous trading it is matched immediately. Dropped orders (halted
    /// phase, expired validity, out-of-band price) return an empty trade list.
    pub fn process(&mut self, mut order: Order) -> Vec<Trade> {
        order.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.order_log.push(order.clone());

        if self.phase == TradingPhase::Halted {
            return Vec::new();
        }
        if order.is_expired(Utc::now()) {
            debug!(order_id = %order.id, "order dropped: expired");
            return Vec::new();
        }

        if matches!(order.kind, OrderKind::Limit | OrderKind::StopLoss) {
            order.price = self.round_to_tick(order.price);
            if !self.within_band(order.price) {
                debug!(order_id = %order.id, price = %order.price, "order rejected: outside price band");
                return Vec::new();
            }
        }

        if matches!(self.phase, TradingPhase::PreOpen | TradingPhase::Closing) {
            self.auction_buffer.push(order);
            return Vec::new();
        }

        self.process_continuous(order)
    }

    fn process_continuous(&mut self, mut order: Order) -> Vec<Trade> {
        if order.is_stop() {
            if self.stop_crossed(&order) {
                self.activate_stop(&mut order);
            } else {
                self.pending_stops.lock().insert(order.id, order);
                return Vec::new();
            }
        }

        if order.kind == OrderKind::Fok && !fok_executable(&order, self.opposite(order.side)) {
            debug!(order_id = %order.id, "FOK order rejected: insufficient visible depth");
            return Vec::new();
        }

        let trades = self.match_and_scan_stops(&mut order);

        if order.remaining() > 0 && matches!(order.kind, OrderKind::Limit | OrderKind::Iceberg) {
            self.own_side(order.side).add_order(order);
        }

        trades
    }

    /// Matches the order, then scans the pending-stop set for triggers that
    /// the resulting trades may have crossed.
    fn match_and_scan_stops(&mut self, order: &mut Order) -> Vec<Trade> {
        let trades = self.run_match_loop(order);
        if !trades.is_empty() && self.phase != TradingPhase::Halted {
            self.activate_triggered_stops();
        }
        trades
    }

    /// The core fill loop. After every trade the last traded price advances
    /// and the circuit breaker is evaluated; a hit halts the loop immediately
    /// so no further trades are produced.
    fn run_match_loop(&mut self, order: &mut Order) -> Vec<Trade> {
        let limit = price_limit(order);
        let opposite = Arc::clone(self.opposite_arc(order.side));
        let mut trades = Vec::new();

        while order.remaining() > 0 {
            let Some(fill) = opposite.execute_at_best(order.remaining(), limit) else {
                break;
            };

            order.filled += fill.quantity;
            if order.kind != OrderKind::Iceberg {
                order.displayed = order.remaining();
            }
            let trade = match order.side {
                Side::Buy => Trade::fill(order.id, fill.order_id, fill.price, fill.quantity),
                Side::Sell => Trade::fill(fill.order_id, order.id, fill.price, fill.quantity),
            };
            trades.push(trade);

            self.last_traded_price = Some(fill.price);
            if self.check_circuit_breaker(fill.price) {
                break;
            }
        }

        self.trade_log.extend(trades.iter().cloned());
        trades
    }

    //----------------------------------------------------------------------------------------------
    // Stop-loss handling
    //----------------------------------------------------------------------------------------------

    fn stop_crossed(&self, order: &Order) -> bool {
        let (Some(last), Some(stop)) = (self.last_traded_price, order.stop_price) else {
            return false;
        };
        match order.side {
            Side::Buy => last >= stop,
            Side::Sell => last <= stop,
        }
    }

    fn activate_stop(&self, order: &mut Order) {
        order.triggered = true;
        match order.kind {
            OrderKind::StopLossMarket => {
                order.kind = OrderKind::Market;
                order.price = Decimal::ZERO;
            }
            _ => order.kind = OrderKind::Limit,
        }
        debug!(order_id = %order.id, kind = ?order.kind, "stop order activated");
    }

    /// Drains newly crossed stops and matches them in discovery order. Each
    /// activation may move the last traded price and cross further stops, so
    /// the scan repeats until it comes up empty (or trading halts).
    fn activate_triggered_stops(&mut self) {
        loop {
            let triggered: Vec<Order> = {
                let mut stops = self.pending_stops.lock();
                let crossed: Vec<Uuid> = stops
                    .values()
                    .filter(|order| self.stop_crossed(order))
                    .map(|order| order.id)
                    .collect();
                crossed.iter().filter_map(|id| stops.remove(id)).collect()
            };
            if triggered.is_empty() {
                return;
            }

            for mut stop in triggered {
                self.activate_stop(&mut stop);
                self.run_match_loop(&mut stop);
                // A converted stop-limit follows normal limit semantics: the
                // residual rests. Converted market residuals are discarded.
                if stop.remaining() > 0 && stop.kind == OrderKind::Limit {
                    self.own_side(stop.side).add_order(stop);
                }
                if self.phase == TradingPhase::Halted {
                    return;
                }
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Call auction
    //----------------------------------------------------------------------------------------------

    /// Runs equilibrium-price discovery over the auction buffer and settles
    /// every eligible order at the clearing price. Unmatched limit residuals
    /// are placed into the continuous book; other kinds are discarded. The
    /// phase advances to CONTINUOUS (pre-open) or POST_CLOSE (closing).
    pub fn execute_call_auction(&mut self) -> Vec<Trade> {
        if self.auction_buffer.is_empty() {
            return Vec::new();
        }
        let mut buffer = std::mem::take(&mut self.auction_buffer);
        let auction_phase = self.phase;

        let equilibrium = self.find_equilibrium_price(&buffer);

        let trades = match equilibrium {
            None => Vec::new(),
            Some(price) => self.settle_auction(&mut buffer, price),
        };

        if auction_phase == TradingPhase::PreOpen {
            if let Some(price) = equilibrium {
                self.opening_price = Some(price);
                self.last_traded_price = Some(price);
                if self.reference_price.is_none() {
                    self.reference_price = Some(price);
                    self.update_price_bands();
                }
            }
        }

        // Unmatched limit residuals carry over into continuous trading.
        for order in buffer {
            if order.remaining() > 0 && order.kind == OrderKind::Limit {
                self.own_side(order.side).add_order(order);
            }
        }

        self.phase = if auction_phase == TradingPhase::Closing {
            TradingPhase::PostClose
        } else {
            TradingPhase::Continuous
        };

        info!(
            price = ?equilibrium,
            trades = trades.len(),
            phase = ?self.phase,
            "call auction executed"
        );
        self.trade_log.extend(trades.iter().cloned());
        trades
    }

    /// The price maximising tradeable volume; ties are broken by closeness to
    /// the reference price. `None` when no price overlaps.
    fn find_equilibrium_price(&self, buffer: &[Order]) -> Option<Decimal> {
        let candidates: BTreeSet<Decimal> = buffer.iter().map(|o| o.price).collect();

        let mut best_price: Option<Decimal> = None;
        let mut max_volume: u64 = 0;

        for &price in &candidates {
            let buy_volume: u64 = buffer
                .iter()
                .filter(|o| o.side == Side::Buy && o.price >= price)
                .map(|o| o.quantity)
                .sum();
            let sell_volume: u64 = buffer
                .iter()
                .filter(|o| o.side == Side::Sell && o.price <= price)
                .map(|o| o.quantity)
                .sum();
            let tradeable = buy_volume.min(sell_volume);

            if tradeable > max_volume {
                max_volume = tradeable;
                best_price = Some(price);
            } else if tradeable == max_volume && tradeable > 0 {
                if let (Some(reference), Some(current)) = (self.reference_price, best_price) {
                    if (price - reference).abs() < (current - reference).abs() {
                        best_price = Some(price);
                    }
                }
            }
        }

        best_price
    }

    /// Matches eligible buys (price ≥ p*) against eligible sells (price ≤ p*)
    /// in strict timestamp order; every trade prints at the equilibrium price.
    fn settle_auction(&self, buffer: &mut [Order], price: Decimal) -> Vec<Trade> {
        let mut buy_idx: Vec<usize> = (0..buffer.len())
            .filter(|&i| buffer[i].side == Side::Buy && buffer[i].price >= price)
            .collect();
        let mut sell_idx: Vec<usize> = (0..buffer.len())
            .filter(|&i| buffer[i].side == Side::Sell && buffer[i].price <= price)
            .collect();
        buy_idx.sort_by_key(|&i| (buffer[i].timestamp, buffer[i].sequence));
        sell_idx.sort_by_key(|&i| (buffer[i].timestamp, buffer[i].sequence));

        let mut trades = Vec::new();
        let (mut b, mut s) = (0, 0);
        while b < buy_idx.len() && s < sell_idx.len() {
            let (bi, si) = (buy_idx[b], sell_idx[s]);
            if buffer[bi].remaining() == 0 {
                b += 1;
                continue;
            }
            if buffer[si].remaining() == 0 {
                s += 1;
                continue;
            }

            let quantity = buffer[bi].remaining().min(buffer[si].remaining());
            trades.push(Trade::fill(buffer[bi].id, buffer[si].id, price, quantity));
            buffer[bi].filled += quantity;
            buffer[si].filled += quantity;

            if buffer[bi].remaining() == 0 {
                b += 1;
            }
            if buffer[si].remaining() == 0 {
                s += 1;
            }
        }
        trades
    }

    //----------------------------------------------------------------------------------------------
    // Cancellation
    //----------------------------------------------------------------------------------------------

    /// Cancels an order. With `async_cancel` enabled the id is enqueued for
    /// the background worker (true = accepted); otherwise the lookup runs
    /// synchronously over bids, asks, then the pending-stop map.
    pub fn cancel(&mut self, order_id: Uuid) -> bool {
        if let Some(tx) = &self.cancel_tx {
            return tx.try_send(order_id).is_ok();
        }
        self.bids.remove_order(order_id)
            || self.asks.remove_order(order_id)
            || self.pending_stops.lock().remove(&order_id).is_some()
    }

    /// Signals the cancellation worker to stop and, when `wait` is set, joins
    /// it. A no-op without `async_cancel`.
    pub fn shutdown(&mut self, wait: bool) {
        self.worker_running.store(false, Ordering::SeqCst);
        self.cancel_tx = None;
        if let Some(handle) = self.cancel_worker.take() {
            if wait {
                let _ = handle.join();
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Accessors
    //----------------------------------------------------------------------------------------------

    fn own_side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn opposite(&self, side: Side) -> &BookSide {
        self.own_side(side.opposite())
    }

    fn opposite_arc(&self, side: Side) -> &Arc<BookSide> {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }

    /// The bid side of the book.
    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    /// The ask side of the book.
    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// Price of the most recent trade.
    pub fn last_traded_price(&self) -> Option<Decimal> {
        self.last_traded_price
    }

    /// Price discovered by the first (pre-open) auction.
    pub fn opening_price(&self) -> Option<Decimal> {
        self.opening_price
    }

    /// Current admission band, when a reference price is set.
    pub fn price_bands(&self) -> Option<(Decimal, Decimal)> {
        match (self.lower_band, self.upper_band) {
            (Some(lower), Some(upper)) => Some((lower, upper)),
            _ => None,
        }
    }

    /// Number of stop orders waiting for their trigger.
    pub fn pending_stop_count(&self) -> usize {
        self.pending_stops.lock().len()
    }

    /// Aggregated depth snapshot.
    pub fn snapshot(&self, levels: usize) -> BookSnapshot {
        BookSnapshot::new(self.bids.depth(levels), self.asks.depth(levels))
    }

    /// All trades produced so far (auction and continuous, including trades
    /// generated by triggered stops).
    pub fn trade_log(&self) -> &[Trade] {
        &self.trade_log
    }

    /// Engine statistics for external observers.
    pub fn statistics(&self) -> ExchangeStatistics {
        ExchangeStatistics {
            total_orders: self.order_log.len() as u64,
            total_trades: self.trade_log.len() as u64,
            circuit_breaker_hits: self.circuit_breaker_hits,
            pending_stop_orders: self.pending_stop_count(),
            trading_phase: self.phase,
            is_halted: self.is_halted(),
            last_traded_price: self.last_traded_price,
            reference_price: self.reference_price,
            opening_price: self.opening_price,
        }
    }
}

impl Drop for ExchangeEngine {
    fn drop(&mut self) {
        if self.cancel_worker.is_some() {
            self.shutdown(true);
        }
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
